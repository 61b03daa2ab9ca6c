// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for `YandexClient`
//!
//! These tests use wiremock to mock the v5 JSON API, the report service and
//! the v4 Live balance endpoint.

use api_client::{ApiError, AuthError};
use external_apis::{
    YandexClient, YandexError,
    yandex::{AccountManagementRequest, AgencyClientsRequest, ReportRequest},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use fixtures::*;

#[tokio::test]
async fn agency_clients_follows_limited_by_pagination() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    Mock::given(method("POST"))
        .and(path("/v5/agencyclients"))
        .and(body_partial_json(json!({ "params": { "Page": { "Offset": 0 } } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(yandex_clients_page(
            &[("client-a", 101), ("client-b", 102)],
            Some(2),
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v5/agencyclients"))
        .and(body_partial_json(json!({ "params": { "Page": { "Offset": 2 } } })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(yandex_clients_page(&[("client-c", 103)], None)),
        )
        .mount(&mock_server)
        .await;

    let request = AgencyClientsRequest::active(2);
    let clients = client.agency_clients("token", &request).await.unwrap();

    let logins: Vec<&str> = clients.iter().map(|c| c.login.as_str()).collect();
    assert_eq!(logins, vec!["client-a", "client-b", "client-c"]);
    assert_eq!(clients[2].client_id, 103);
}

#[tokio::test]
async fn empty_first_page_yields_no_clients() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    Mock::given(method("POST"))
        .and(path("/v5/agencyclients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(yandex_clients_page(&[], None)))
        .mount(&mock_server)
        .await;

    let request = AgencyClientsRequest::active(2);
    let clients = client.agency_clients("token", &request).await.unwrap();
    assert!(clients.is_empty());
}

#[tokio::test]
async fn report_polls_until_ready_honoring_retry_in() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    // Two "still processing" responses, then the finished TSV.
    Mock::given(method("POST"))
        .and(path("/v5/reports"))
        .respond_with(ResponseTemplate::new(202).insert_header("retryIn", "0"))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v5/reports"))
        .and(header("Client-Login", "client-a"))
        .and(header("skipReportHeader", "true"))
        .and(header("skipReportSummary", "true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("2022-11-01\t10.5\n2022-11-02\t0\n"),
        )
        .mount(&mock_server)
        .await;

    let request = ReportRequest::account_costs(date("2022-11-01"), date("2022-11-09"));
    let rows = client
        .cost_report("token", "client-a", &request)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Date"], "2022-11-01");
    assert_eq!(rows[0]["Cost"], "10.5");
    assert_eq!(rows[1]["Cost"], "0");

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn report_poll_budget_is_enforced_when_configured() {
    let mock_server = MockServer::start().await;
    let mut config = yandex_config(&mock_server.uri());
    config.max_poll_attempts = Some(3);
    let client = YandexClient::new(config).unwrap();

    Mock::given(method("POST"))
        .and(path("/v5/reports"))
        .respond_with(ResponseTemplate::new(201).insert_header("retryIn", "0"))
        .mount(&mock_server)
        .await;

    let request = ReportRequest::account_costs(date("2022-11-01"), date("2022-11-09"));
    let error = client
        .cost_report("token", "client-a", &request)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        YandexError::ReportPollExhausted { attempts: 3 }
    ));
    let api_error: ApiError = error.into();
    assert!(matches!(api_error, ApiError::ExhaustedRetries { attempts: 3 }));
}

#[tokio::test]
async fn rejected_token_maps_to_auth_error() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    Mock::given(method("POST"))
        .and(path("/v5/agencyclients"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let request = AgencyClientsRequest::active(2);
    let error = client.agency_clients("bad-token", &request).await.unwrap_err();
    assert!(matches!(error, YandexError::Unauthorized { status: 401 }));

    let api_error: ApiError = error.into();
    assert!(matches!(api_error, ApiError::Auth(AuthError::InvalidToken)));
}

#[tokio::test]
async fn in_body_error_carries_request_context() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    Mock::given(method("POST"))
        .and(path("/v5/agencyclients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {
                "error_code": 54,
                "error_string": "No rights",
                "error_detail": "No rights to indicated client",
                "request_id": "8695244274068608439"
            }
        })))
        .mount(&mock_server)
        .await;

    let request = AgencyClientsRequest::active(2);
    let error = client.agency_clients("token", &request).await.unwrap_err();
    match error {
        YandexError::Api { message, .. } => {
            assert!(message.contains("No rights"));
            assert!(message.contains("8695244274068608439"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn account_balances_parse_string_amounts() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    Mock::given(method("POST"))
        .and(path("/live/"))
        .and(body_partial_json(json!({ "method": "AccountManagement" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(yandex_balances(&[
            ("client-a", "1500.75"),
            ("client-b", "0"),
        ])))
        .mount(&mock_server)
        .await;

    let request = AccountManagementRequest {
        logins: vec!["client-a".to_string(), "client-b".to_string()],
    };
    let balances = client.account_balances("token", &request).await.unwrap();

    assert_eq!(balances.len(), 2);
    assert_eq!(balances[0].login, "client-a");
    assert!((balances[0].amount - 1500.75).abs() < f64::EPSILON);
    assert!(balances[1].amount.abs() < f64::EPSILON);
}

#[tokio::test]
async fn unparseable_balance_is_a_protocol_error() {
    let mock_server = MockServer::start().await;
    let client = YandexClient::new(yandex_config(&mock_server.uri())).unwrap();

    Mock::given(method("POST"))
        .and(path("/live/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(yandex_balances(&[("client-a", "not-a-number")])),
        )
        .mount(&mock_server)
        .await;

    let request = AccountManagementRequest {
        logins: vec!["client-a".to_string()],
    };
    let error = client.account_balances("token", &request).await.unwrap_err();
    assert!(matches!(error, YandexError::Protocol(_)));
}
