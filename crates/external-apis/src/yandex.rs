// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Yandex Direct API integration
//!
//! Yandex Direct exposes a JSON-RPC-like v5 API (`{"method": ..., "params":
//! {...}}` POST bodies) for agency client listings, an asynchronous report
//! service returning tab-separated text, and a legacy v4 Live API for account
//! balances. Listings paginate through the server's `LimitedBy` marker, whose
//! value is reused verbatim as the next page offset.

use std::{collections::HashMap, time::Duration};

use api_client::{ApiError, AuthError};
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::transport::{EndpointRequest, RawResponse, TransportFailure, decode_json, execute};

// Yandex Direct API constants
const DEFAULT_API_URL: &str = "https://api.direct.yandex.com/json/v5/";
const SANDBOX_API_URL: &str = "https://api-sandbox.direct.yandex.com/json/v5/";
const DEFAULT_LIVE_API_URL: &str = "https://api.direct.yandex.ru/live/v4/json/";
const OAUTH_AUTHORIZE_URL: &str = "https://oauth.yandex.ru/authorize";
const OAUTH_TOKEN_URL: &str = "https://oauth.yandex.ru/token";

const AGENCY_CLIENTS_SERVICE: &str = "agencyclients";
const REPORTS_SERVICE: &str = "reports";
const REPORT_TYPE: &str = "ACCOUNT_PERFORMANCE_REPORT";
const RETRY_IN_HEADER: &str = "retryIn";

const DEFAULT_PAGE_LIMIT: u64 = 2000;
const DEFAULT_REPORT_RETRY_SECONDS: u64 = 60;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const LOGINS_PER_BALANCE_REQUEST: usize = 100;

/// Configuration for the Yandex Direct API client
#[derive(Debug, Clone)]
pub struct YandexConfig {
    /// Base URL of the v5 JSON API (trailing slash included)
    pub api_url: String,
    /// Base URL of the v4 Live API used for account balances
    pub live_api_url: String,
    /// Page size for agency client listings
    pub page_limit: u64,
    /// Fallback poll interval when the report service sends no `retryIn`
    pub report_retry_default: Duration,
    /// Optional cap on report polls; `None` polls until the report is ready
    pub max_poll_attempts: Option<u32>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for YandexConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            live_api_url: DEFAULT_LIVE_API_URL.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            report_retry_default: Duration::from_secs(DEFAULT_REPORT_RETRY_SECONDS),
            max_poll_attempts: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl YandexConfig {
    /// Configuration pointed at the Yandex Direct sandbox
    pub fn sandbox() -> Self {
        Self {
            api_url: SANDBOX_API_URL.to_string(),
            ..Self::default()
        }
    }
}

/// Errors specific to the Yandex Direct API client
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum YandexError {
    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    /// The API rejected the access token
    #[error("authentication failed with status {status}")]
    Unauthorized { status: u16 },

    /// The API reported an error, in the status line or the body
    #[error("API error (status {status}) from {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    /// The report service never finished within the configured poll budget
    #[error("report not ready after {attempts} polls")]
    ReportPollExhausted { attempts: u32 },

    /// Response shape did not match the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<YandexError> for ApiError {
    fn from(value: YandexError) -> Self {
        match value {
            YandexError::Transport(failure) => failure.into(),
            YandexError::Unauthorized { .. } => ApiError::Auth(AuthError::InvalidToken),
            YandexError::Api {
                status,
                url,
                message,
            } => ApiError::Api {
                status,
                url,
                message,
            },
            YandexError::ReportPollExhausted { attempts } => {
                ApiError::ExhaustedRetries { attempts }
            }
            YandexError::Protocol(message) => ApiError::Protocol { message },
            YandexError::Config(message) => ApiError::Configuration { message },
        }
    }
}

/// Descriptor for the v5 `agencyclients` listing
#[derive(Debug, Clone)]
pub struct AgencyClientsRequest {
    /// Selection criteria object, e.g. `{"Archived": "NO"}`
    pub criteria: serde_json::Value,
    /// Client fields to request
    pub field_names: Vec<String>,
    /// Page size
    pub limit: u64,
}

impl AgencyClientsRequest {
    /// Listing of non-archived clients with the fields the normalizer needs
    pub fn active(limit: u64) -> Self {
        Self {
            criteria: json!({ "Archived": "NO" }),
            field_names: vec!["Login".to_string(), "ClientId".to_string()],
            limit,
        }
    }

    fn body(&self, offset: u64) -> serde_json::Value {
        json!({
            "method": "get",
            "params": {
                "SelectionCriteria": &self.criteria,
                "FieldNames": &self.field_names,
                "Page": {
                    "Limit": self.limit,
                    "Offset": offset,
                }
            }
        })
    }
}

/// Descriptor for an asynchronous statistics report
///
/// Declares the TSV column list the response rows are zipped against.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    /// Columns requested from the report service, in order
    pub field_names: Vec<String>,
    /// Report name, unique per definition on the Yandex side
    pub report_name: String,
    /// First statistics date
    pub date_from: NaiveDate,
    /// Last statistics date
    pub date_to: NaiveDate,
}

impl ReportRequest {
    /// Per-day account cost report used by the spend collector
    pub fn account_costs(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            field_names: vec!["Date".to_string(), "Cost".to_string()],
            report_name: "ACCOUNT_COST".to_string(),
            date_from,
            date_to,
        }
    }

    fn body(&self) -> serde_json::Value {
        json!({
            "params": {
                "SelectionCriteria": {
                    "DateFrom": self.date_from.format("%Y-%m-%d").to_string(),
                    "DateTo": self.date_to.format("%Y-%m-%d").to_string(),
                },
                "FieldNames": &self.field_names,
                "ReportName": &self.report_name,
                "ReportType": REPORT_TYPE,
                "DateRangeType": "CUSTOM_DATE",
                "Format": "TSV",
                "IncludeVAT": "NO",
                "IncludeDiscount": "NO",
            }
        })
    }
}

/// Descriptor for the v4 Live `AccountManagement` balance lookup
#[derive(Debug, Clone)]
pub struct AccountManagementRequest {
    /// Logins of the accounts to fetch balances for
    pub logins: Vec<String>,
}

/// One agency client from the listing
#[derive(Debug, Clone, Deserialize)]
pub struct AgencyClientItem {
    /// Client login, the key statistics and balances are matched back by
    #[serde(rename = "Login")]
    pub login: String,
    /// Numeric external client id
    #[serde(rename = "ClientId")]
    pub client_id: i64,
}

/// One decoded report row, keyed by the declared field names
pub type ReportRow = HashMap<String, String>;

/// Account balance returned by the v4 Live API
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    /// Account login
    pub login: String,
    /// Remaining balance
    pub amount: f64,
}

/// OAuth tokens returned by the Yandex OAuth endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct YandexOAuthTokens {
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgencyClientsResult {
    #[serde(rename = "Clients", default)]
    clients: Vec<AgencyClientItem>,
    #[serde(rename = "LimitedBy")]
    limited_by: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(rename = "Login")]
    login: String,
    #[serde(rename = "Amount")]
    amount: String,
}

/// Yandex Direct API client
#[derive(Debug)]
pub struct YandexClient {
    http: Client,
    config: YandexConfig,
}

impl YandexClient {
    /// Create a new Yandex Direct API client
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URLs are invalid or the HTTP
    /// client cannot be created.
    pub fn new(config: YandexConfig) -> Result<Self, YandexError> {
        Url::parse(&config.api_url)
            .map_err(|error| YandexError::Config(format!("invalid api_url: {error}")))?;
        Url::parse(&config.live_api_url)
            .map_err(|error| YandexError::Config(format!("invalid live_api_url: {error}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("adspend-api/0.1.0")
            .build()
            .map_err(TransportFailure::Http)?;

        Ok(Self { http, config })
    }

    /// The active configuration
    pub fn config(&self) -> &YandexConfig {
        &self.config
    }

    /// List all agency clients, following `LimitedBy` pagination
    ///
    /// Pages are concatenated in arrival order; an empty first page yields an
    /// empty vec.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, rejected tokens, or in-body
    /// API errors.
    pub async fn agency_clients(
        &self,
        access_token: &str,
        request: &AgencyClientsRequest,
    ) -> Result<Vec<AgencyClientItem>, YandexError> {
        let url = self.endpoint(AGENCY_CLIENTS_SERVICE)?;
        let mut offset = 0_u64;
        let mut clients = Vec::new();

        loop {
            let endpoint_request = EndpointRequest::post(url.clone())
                .with_header("Authorization", format!("Bearer {access_token}"))
                .with_header("Accept-Language", "ru")
                .with_json(request.body(offset));

            let response = execute(&self.http, endpoint_request).await?;
            let value = self.classify(&response, url.as_str())?;

            let result: AgencyClientsResult = match value.get("result") {
                Some(result) => serde_json::from_value(result.clone()).map_err(|error| {
                    YandexError::Protocol(format!("malformed agencyclients result: {error}"))
                })?,
                None => {
                    return Err(YandexError::Protocol(
                        "agencyclients response has no result".to_string(),
                    ));
                }
            };

            debug!(
                page_size = result.clients.len(),
                offset,
                limited_by = ?result.limited_by,
                "fetched agency clients page"
            );
            clients.extend(result.clients);

            match result.limited_by {
                // The server marker is reused verbatim as the next offset.
                Some(limited_by) => offset = limited_by,
                None => break,
            }
        }

        Ok(clients)
    }

    /// Fetch a per-client cost report, polling until the report is ready
    ///
    /// Status 200 means ready; 201/202 mean queued/processing, in which case
    /// the server's `retryIn` header decides the sleep before the identical
    /// request is resubmitted.
    ///
    /// # Errors
    ///
    /// Returns an error on rejected tokens, unexpected report statuses, TSV
    /// rows that do not match the declared field list, or an exceeded poll
    /// budget when one is configured.
    pub async fn cost_report(
        &self,
        access_token: &str,
        client_login: &str,
        request: &ReportRequest,
    ) -> Result<Vec<ReportRow>, YandexError> {
        let url = self.endpoint(REPORTS_SERVICE)?;
        let body = request.body();
        let mut polls: u32 = 0;

        loop {
            let endpoint_request = EndpointRequest::post(url.clone())
                .with_header("Authorization", format!("Bearer {access_token}"))
                .with_header("Client-Login", client_login)
                .with_header("Accept-Language", "ru")
                .with_header("processingMode", "auto")
                .with_header("returnMoneyInMicros", "false")
                .with_header("skipReportHeader", "true")
                .with_header("skipReportSummary", "true")
                .with_json(body.clone());

            let response = execute(&self.http, endpoint_request).await?;
            match response.status {
                StatusCode::OK => return parse_tsv(&response.body, &request.field_names),
                StatusCode::CREATED | StatusCode::ACCEPTED => {
                    polls += 1;
                    if let Some(cap) = self.config.max_poll_attempts
                        && polls >= cap
                    {
                        return Err(YandexError::ReportPollExhausted { attempts: polls });
                    }
                    let wait = response
                        .retry_interval(RETRY_IN_HEADER, self.config.report_retry_default);
                    info!(
                        login = client_login,
                        status = response.status.as_u16(),
                        wait_seconds = wait.as_secs(),
                        "report not ready, polling again"
                    );
                    sleep(wait).await;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(YandexError::Unauthorized {
                        status: response.status.as_u16(),
                    });
                }
                status => {
                    warn!(
                        status = status.as_u16(),
                        login = client_login,
                        "report request failed"
                    );
                    return Err(YandexError::Api {
                        status: status.as_u16(),
                        url: url.to_string(),
                        message: response.body,
                    });
                }
            }
        }
    }

    /// Fetch account balances through the v4 Live `AccountManagement` call
    ///
    /// Logins are chunked; results are concatenated in arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, API errors, or unparseable
    /// balance amounts.
    pub async fn account_balances(
        &self,
        access_token: &str,
        request: &AccountManagementRequest,
    ) -> Result<Vec<AccountBalance>, YandexError> {
        let url = Url::parse(&self.config.live_api_url)
            .map_err(|error| YandexError::Config(format!("invalid live_api_url: {error}")))?;
        let mut balances = Vec::new();

        for chunk in request.logins.chunks(LOGINS_PER_BALANCE_REQUEST) {
            let body = json!({
                "method": "AccountManagement",
                "token": access_token,
                "param": {
                    "Action": "Get",
                    "SelectionCriteria": {
                        "Logins": chunk,
                    }
                }
            });

            let endpoint_request = EndpointRequest::post(url.clone()).with_json(body);
            let response = execute(&self.http, endpoint_request).await?;
            let value = self.classify(&response, url.as_str())?;

            let accounts = value
                .get("data")
                .and_then(|data| data.get("Accounts"))
                .cloned()
                .ok_or_else(|| {
                    YandexError::Protocol(
                        "AccountManagement response has no data.Accounts".to_string(),
                    )
                })?;
            let entries: Vec<AccountEntry> =
                serde_json::from_value(accounts).map_err(|error| {
                    YandexError::Protocol(format!("malformed AccountManagement entry: {error}"))
                })?;

            for entry in entries {
                let amount = entry.amount.trim().parse::<f64>().map_err(|_| {
                    YandexError::Protocol(format!(
                        "unparseable balance amount for {}: {}",
                        entry.login, entry.amount
                    ))
                })?;
                balances.push(AccountBalance {
                    login: entry.login,
                    amount,
                });
            }
        }

        Ok(balances)
    }

    fn endpoint(&self, service: &str) -> Result<Url, YandexError> {
        Url::parse(&format!("{}{service}", self.config.api_url))
            .map_err(|error| YandexError::Config(format!("invalid endpoint URL: {error}")))
    }

    /// Classify status and in-body errors, yielding the decoded JSON body
    fn classify(
        &self,
        response: &RawResponse,
        url: &str,
    ) -> Result<serde_json::Value, YandexError> {
        if response.status == StatusCode::UNAUTHORIZED || response.status == StatusCode::FORBIDDEN
        {
            return Err(YandexError::Unauthorized {
                status: response.status.as_u16(),
            });
        }

        let value = decode_json(response).map_err(|error| {
            YandexError::Protocol(format!("undecodable response from {url}: {error}"))
        })?;

        // v5 nests the error object; v4 Live flattens error_code/error_str.
        if let Some(error) = value.get("error") {
            let message = error
                .get("error_string")
                .or_else(|| error.get("error_detail"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown API error");
            let request_id = error
                .get("request_id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("-");
            warn!(request_id, message, url, "Yandex Direct API error");
            return Err(YandexError::Api {
                status: response.status.as_u16(),
                url: url.to_string(),
                message: format!("{message} (RequestId: {request_id})"),
            });
        }
        if let Some(code) = value.get("error_code") {
            let message = value
                .get("error_str")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown API error");
            return Err(YandexError::Api {
                status: response.status.as_u16(),
                url: url.to_string(),
                message: format!("{message} (error_code: {code})"),
            });
        }

        if !response.status.is_success() {
            return Err(YandexError::Api {
                status: response.status.as_u16(),
                url: url.to_string(),
                message: response.body.clone(),
            });
        }

        Ok(value)
    }
}

/// Zip TSV rows against the declared field-name list
fn parse_tsv(body: &str, field_names: &[String]) -> Result<Vec<ReportRow>, YandexError> {
    let mut rows = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != field_names.len() {
            return Err(YandexError::Protocol(format!(
                "report row has {} columns, expected {}: {line}",
                columns.len(),
                field_names.len()
            )));
        }
        rows.push(
            field_names
                .iter()
                .cloned()
                .zip(columns.iter().map(|column| (*column).to_string()))
                .collect(),
        );
    }
    Ok(rows)
}

/// Build the OAuth verification-code URL for the authorization dialog
///
/// # Errors
///
/// Returns an error only if the static OAuth URL fails to parse, which is a
/// configuration bug.
pub fn verification_code_url(client_id: &str) -> Result<Url, YandexError> {
    let mut url = Url::parse(OAUTH_AUTHORIZE_URL)
        .map_err(|error| YandexError::Config(format!("invalid OAuth URL: {error}")))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id);
    Ok(url)
}

/// Exchange a verification code for OAuth tokens
///
/// # Errors
///
/// Returns an error on transport failures, non-200 statuses, or an in-body
/// `error` field.
pub async fn exchange_code_on_token(
    http: &Client,
    client_id: &str,
    client_secret: &str,
    code: &str,
) -> Result<YandexOAuthTokens, YandexError> {
    let url = Url::parse(OAUTH_TOKEN_URL)
        .map_err(|error| YandexError::Config(format!("invalid OAuth URL: {error}")))?;
    let request = EndpointRequest::post(url.clone()).with_form(vec![
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("code".to_string(), code.to_string()),
        ("client_id".to_string(), client_id.to_string()),
        ("client_secret".to_string(), client_secret.to_string()),
    ]);

    let response = execute(http, request).await?;
    let value = decode_json(&response)
        .map_err(|error| YandexError::Protocol(format!("undecodable OAuth response: {error}")))?;

    if let Some(error) = value.get("error") {
        let description = value
            .get("error_description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");
        return Err(YandexError::Api {
            status: response.status.as_u16(),
            url: url.to_string(),
            message: format!("error: {error}, error_description: {description}"),
        });
    }
    if response.status != StatusCode::OK {
        return Err(YandexError::Api {
            status: response.status.as_u16(),
            url: url.to_string(),
            message: response.body,
        });
    }

    serde_json::from_value(value)
        .map_err(|error| YandexError::Protocol(format!("malformed OAuth tokens: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn listing_body_carries_pagination() {
        let request = AgencyClientsRequest::active(2000);
        let body = request.body(4000);

        assert_eq!(body["method"], "get");
        assert_eq!(body["params"]["SelectionCriteria"]["Archived"], "NO");
        assert_eq!(body["params"]["Page"]["Limit"], 2000);
        assert_eq!(body["params"]["Page"]["Offset"], 4000);
    }

    #[test]
    fn report_body_matches_report_definition() {
        let request = ReportRequest::account_costs(date("2022-11-01"), date("2022-11-09"));
        let body = request.body();

        assert_eq!(body["params"]["ReportType"], REPORT_TYPE);
        assert_eq!(body["params"]["Format"], "TSV");
        assert_eq!(body["params"]["DateRangeType"], "CUSTOM_DATE");
        assert_eq!(body["params"]["SelectionCriteria"]["DateFrom"], "2022-11-01");
        assert_eq!(body["params"]["SelectionCriteria"]["DateTo"], "2022-11-09");
        assert_eq!(body["params"]["FieldNames"][0], "Date");
        assert_eq!(body["params"]["FieldNames"][1], "Cost");
    }

    #[test]
    fn tsv_rows_zip_against_field_names() {
        let fields = vec!["Date".to_string(), "Cost".to_string()];
        let body = "2022-11-01\t10.5\n2022-11-02\t0\n";

        let rows = parse_tsv(body, &fields).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Date"], "2022-11-01");
        assert_eq!(rows[0]["Cost"], "10.5");
        assert_eq!(rows[1]["Cost"], "0");
    }

    #[test]
    fn tsv_column_mismatch_is_a_protocol_error() {
        let fields = vec!["Date".to_string(), "Cost".to_string()];
        let body = "2022-11-01\t10.5\textra\n";

        let error = parse_tsv(body, &fields).unwrap_err();
        assert!(matches!(error, YandexError::Protocol(_)));
    }

    #[test]
    fn empty_report_body_yields_no_rows() {
        let fields = vec!["Date".to_string(), "Cost".to_string()];
        assert!(parse_tsv("", &fields).unwrap().is_empty());
    }

    #[test]
    fn sandbox_config_switches_base_url() {
        let config = YandexConfig::sandbox();
        assert_eq!(config.api_url, SANDBOX_API_URL);
        assert_eq!(config.page_limit, DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn verification_url_contains_client_id() {
        let url = verification_code_url("my-app").unwrap();
        assert!(url.as_str().starts_with(OAUTH_AUTHORIZE_URL));
        assert!(
            url.query_pairs()
                .any(|(name, value)| name == "client_id" && value == "my-app")
        );
    }

    #[test]
    fn unauthorized_maps_to_invalid_token() {
        let error: ApiError = YandexError::Unauthorized { status: 401 }.into();
        assert!(matches!(error, ApiError::Auth(AuthError::InvalidToken)));
    }

    #[test]
    fn poll_exhaustion_maps_to_exhausted_retries() {
        let error: ApiError = YandexError::ReportPollExhausted { attempts: 5 }.into();
        assert!(matches!(error, ApiError::ExhaustedRetries { attempts: 5 }));
    }
}
