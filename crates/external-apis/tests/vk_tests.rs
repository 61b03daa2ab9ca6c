// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for `VkApiClient`
//!
//! These tests use wiremock to mock the GET-per-method API, including the
//! in-body rate-limit errors the retry policy reacts to.

use api_client::ApiError;
use external_apis::{
    VkApiClient, VkError,
    vk::{StatisticsRequest, with_rate_limit_retry},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

use fixtures::*;

#[tokio::test]
async fn accounts_lists_visible_accounts() {
    let mock_server = MockServer::start().await;
    let client = VkApiClient::new(vk_config(&mock_server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/method/ads.getAccounts"))
        .and(query_param("access_token", "token"))
        .and(query_param("v", "5.131"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vk_response(json!([
            { "account_id": 604, "account_name": "Agency cabinet" },
            { "account_id": 605 }
        ]))))
        .mount(&mock_server)
        .await;

    let accounts = client.accounts("token").await.unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].account_id, 604);
    assert_eq!(accounts[0].account_name.as_deref(), Some("Agency cabinet"));
    assert!(accounts[1].account_name.is_none());
}

#[tokio::test]
async fn flood_control_retries_then_succeeds() {
    let mock_server = MockServer::start().await;
    let config = vk_config(&mock_server.uri());
    let client = VkApiClient::new(config.clone()).unwrap();

    // Two flood rejections, then the listing.
    Mock::given(method("GET"))
        .and(path("/method/ads.getClients"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vk_error(9, "Flood control")),
        )
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/method/ads.getClients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vk_response(json!([
            { "id": 7, "name": "client-seven" }
        ]))))
        .mount(&mock_server)
        .await;

    let clients = with_rate_limit_retry(&config, || client.clients("token", 604))
        .await
        .unwrap();

    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, 7);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn rate_limit_exhaustion_after_max_attempts() {
    let mock_server = MockServer::start().await;
    let mut config = vk_config(&mock_server.uri());
    config.max_attempts = 3;
    let client = VkApiClient::new(config.clone()).unwrap();

    Mock::given(method("GET"))
        .and(path("/method/ads.getAccounts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vk_error(6, "Too many requests per second")),
        )
        .mount(&mock_server)
        .await;

    let error = with_rate_limit_retry(&config, || client.accounts("token"))
        .await
        .unwrap_err();
    assert!(matches!(error, VkError::Exhausted { attempts: 3 }));

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn statistics_sends_comma_joined_ids_and_parses_rows() {
    let mock_server = MockServer::start().await;
    let client = VkApiClient::new(vk_config(&mock_server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/method/ads.getStatistics"))
        .and(query_param("ids", "7,8"))
        .and(query_param("ids_type", "client"))
        .and(query_param("period", "day"))
        .and(query_param("date_from", "2022-11-01"))
        .and(query_param("date_to", "2022-11-09"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vk_response(json!([
            {
                "id": 7,
                "stats": [
                    { "day": "2022-11-01", "spent": "10.5" },
                    { "day": "2022-11-02" }
                ]
            },
            { "id": 8, "stats": [] }
        ]))))
        .mount(&mock_server)
        .await;

    let request =
        StatisticsRequest::daily(604, vec![7, 8], date("2022-11-01"), date("2022-11-09"));
    let items = client.statistics("token", &request).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].stats.len(), 2);
    assert!((items[0].stats[0].spent - 10.5).abs() < f64::EPSILON);
    assert!(items[0].stats[1].spent.abs() < f64::EPSILON);
    assert!(items[1].stats.is_empty());
}

#[tokio::test]
async fn budget_parses_string_response() {
    let mock_server = MockServer::start().await;
    let client = VkApiClient::new(vk_config(&mock_server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/method/ads.getBudget"))
        .and(query_param("account_id", "604"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vk_response(json!("205.5"))))
        .mount(&mock_server)
        .await;

    let budget = client.budget("token", 604).await.unwrap();
    assert!((budget - 205.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn api_error_code_is_surfaced() {
    let mock_server = MockServer::start().await;
    let client = VkApiClient::new(vk_config(&mock_server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/method/ads.getClients"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(vk_error(100, "One of the parameters specified was invalid")),
        )
        .mount(&mock_server)
        .await;

    let error = client.clients("token", 604).await.unwrap_err();
    assert!(matches!(error, VkError::Api { code: 100, .. }));

    let api_error: ApiError = error.into();
    assert!(!api_error.is_recoverable());
}

#[tokio::test]
async fn non_success_status_is_an_http_error() {
    let mock_server = MockServer::start().await;
    let client = VkApiClient::new(vk_config(&mock_server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/method/ads.getAccounts"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let error = client.accounts("token").await.unwrap_err();
    assert!(matches!(error, VkError::Http { status: 500, .. }));
}
