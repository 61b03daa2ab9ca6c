// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! MyTarget API integration
//!
//! MyTarget authenticates with short-lived Bearer tokens issued through an
//! OAuth2 client-credentials flow. Auth rejections arrive with 401/403 and a
//! body that is either a bare JSON string (`"expired_token"`) or an object
//! nesting the code under `error`; the sentinels `invalid_token`,
//! `expired_token` and `token_limit_exceeded` decide whether a refresh, a
//! re-issue or a token purge is in order. Listings paginate with
//! `limit`/`offset` until a page comes back with no items.

use std::time::Duration;

use api_client::{ApiError, AuthError};
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::transport::{EndpointRequest, RawResponse, TransportFailure, decode_json, execute};

const DEFAULT_BASE_URL: &str = "https://target.my.com/api/v2/";

const AGENCY_CLIENTS_PATH: &str = "agency/clients.json";
const DAY_STATISTICS_PATH: &str = "statistics/users/day.json";
const TOKEN_PATH: &str = "oauth2/token.json";
const TOKEN_DELETE_PATH: &str = "oauth2/token/delete.json";

const INVALID_TOKEN: &str = "invalid_token";
const EXPIRED_TOKEN: &str = "expired_token";
const TOKEN_LIMIT_EXCEEDED: &str = "token_limit_exceeded";

const DEFAULT_PAGE_LIMIT: u64 = 50;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Configuration for the MyTarget API client
#[derive(Debug, Clone)]
pub struct MyTargetConfig {
    /// Base URL of the v2 API (trailing slash included)
    pub base_url: String,
    /// OAuth2 application id
    pub client_id: String,
    /// OAuth2 application secret
    pub client_secret: String,
    /// Page size for listings
    pub page_limit: u64,
    /// Attempts per call before auth recovery is treated as fatal
    pub max_attempts: u32,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl MyTargetConfig {
    /// Create a configuration for the production API
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// Errors specific to the MyTarget API client
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum MyTargetError {
    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    /// The token was rejected as invalid
    #[error("access token rejected as invalid")]
    InvalidToken,

    /// The token has expired and should be refreshed
    #[error("access token expired")]
    ExpiredToken,

    /// The application holds too many active tokens
    #[error("token limit exceeded")]
    TokenLimitExceeded,

    /// Auth recovery retries ran out
    #[error("authentication still failing after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// Non-success HTTP status without an auth sentinel
    #[error("API error (status {status}) from {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    /// Response shape did not match the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<MyTargetError> for ApiError {
    fn from(value: MyTargetError) -> Self {
        match value {
            MyTargetError::Transport(failure) => failure.into(),
            MyTargetError::InvalidToken => ApiError::Auth(AuthError::InvalidToken),
            MyTargetError::ExpiredToken => ApiError::Auth(AuthError::ExpiredToken),
            MyTargetError::TokenLimitExceeded => ApiError::Auth(AuthError::TokenLimitExceeded),
            MyTargetError::Exhausted { attempts } => ApiError::ExhaustedRetries { attempts },
            MyTargetError::Api {
                status,
                url,
                message,
            } => ApiError::Api {
                status,
                url,
                message,
            },
            MyTargetError::Protocol(message) => ApiError::Protocol { message },
            MyTargetError::Config(message) => ApiError::Configuration { message },
        }
    }
}

/// One agency client from the listing
#[derive(Debug, Clone)]
pub struct MyTargetClientItem {
    /// Numeric user id of the client account
    pub id: i64,
    /// Client display name
    pub name: String,
}

/// Statistics for one requested user id
#[derive(Debug, Clone, Deserialize)]
pub struct MyTargetStatisticsItem {
    /// The user id the statistics belong to
    pub id: i64,
    /// Per-day rows
    #[serde(default)]
    pub rows: Vec<MyTargetStatRow>,
}

/// One per-day statistics row
#[derive(Debug, Clone, Deserialize)]
pub struct MyTargetStatRow {
    /// Statistics date
    pub date: NaiveDate,
    /// The `base` metrics block the spend lives in
    pub base: BaseMetrics,
}

/// The `base` metrics block of a statistics row
#[derive(Debug, Clone, Deserialize)]
pub struct BaseMetrics {
    /// Spend for the day; sent as a string or number, absent on idle days
    #[serde(default, deserialize_with = "flexible_f64")]
    pub spent: f64,
}

/// Tokens issued by the MyTarget OAuth2 endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MyTargetTokens {
    /// Access token
    pub access_token: String,
    /// Refresh token, absent on some grants
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgencyClientsPage {
    #[serde(default)]
    items: Vec<AgencyClientEntry>,
}

#[derive(Debug, Deserialize)]
struct AgencyClientEntry {
    user: AgencyClientUser,
}

#[derive(Debug, Deserialize)]
struct AgencyClientUser {
    id: i64,
    #[serde(default)]
    client_username: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DayStatisticsResponse {
    #[serde(default)]
    items: Vec<MyTargetStatisticsItem>,
}

/// MyTarget API client
#[derive(Debug)]
pub struct MyTargetApiClient {
    http: Client,
    config: MyTargetConfig,
}

impl MyTargetApiClient {
    /// Create a new MyTarget API client
    ///
    /// # Errors
    ///
    /// Returns an error if the OAuth application credentials are empty, the
    /// base URL is invalid, or the HTTP client cannot be created.
    pub fn new(config: MyTargetConfig) -> Result<Self, MyTargetError> {
        if config.client_id.trim().is_empty() {
            return Err(MyTargetError::Config("client_id must not be empty".to_string()));
        }
        if config.client_secret.trim().is_empty() {
            return Err(MyTargetError::Config(
                "client_secret must not be empty".to_string(),
            ));
        }
        Url::parse(&config.base_url)
            .map_err(|error| MyTargetError::Config(format!("invalid base_url: {error}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("adspend-api/0.1.0")
            .build()
            .map_err(TransportFailure::Http)?;

        Ok(Self { http, config })
    }

    /// The active configuration
    pub fn config(&self) -> &MyTargetConfig {
        &self.config
    }

    /// List all agency clients, paging until an empty page arrives
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, auth rejections, or API
    /// errors.
    pub async fn agency_clients(
        &self,
        access_token: &str,
    ) -> Result<Vec<MyTargetClientItem>, MyTargetError> {
        let url = self.endpoint(AGENCY_CLIENTS_PATH)?;
        let mut offset = 0_u64;
        let mut clients = Vec::new();

        loop {
            let request = EndpointRequest::get(url.clone())
                .with_header("Authorization", format!("Bearer {access_token}"))
                .with_query("limit", self.config.page_limit.to_string())
                .with_query("offset", offset.to_string());

            let response = execute(&self.http, request).await?;
            let value = self.classify(&response, url.as_str())?;
            let page: AgencyClientsPage = serde_json::from_value(value).map_err(|error| {
                MyTargetError::Protocol(format!("malformed agency clients page: {error}"))
            })?;

            if page.items.is_empty() {
                break;
            }
            debug!(page_size = page.items.len(), offset, "fetched agency clients page");
            offset += self.config.page_limit;

            for entry in page.items {
                let name = entry
                    .user
                    .client_username
                    .or(entry.user.username)
                    .unwrap_or_else(|| entry.user.id.to_string());
                clients.push(MyTargetClientItem {
                    id: entry.user.id,
                    name,
                });
            }
        }

        Ok(clients)
    }

    /// Fetch per-day base statistics for the given user ids
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, auth rejections, or API
    /// errors.
    pub async fn day_statistics(
        &self,
        access_token: &str,
        ids: &[i64],
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<MyTargetStatisticsItem>, MyTargetError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint(DAY_STATISTICS_PATH)?;
        let joined = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let request = EndpointRequest::get(url.clone())
            .with_header("Authorization", format!("Bearer {access_token}"))
            .with_query("id", joined)
            .with_query("metrics", "base")
            .with_query("date_from", date_from.format("%Y-%m-%d").to_string())
            .with_query("date_to", date_to.format("%Y-%m-%d").to_string());

        let response = execute(&self.http, request).await?;
        let value = self.classify(&response, url.as_str())?;
        let decoded: DayStatisticsResponse = serde_json::from_value(value).map_err(|error| {
            MyTargetError::Protocol(format!("malformed statistics response: {error}"))
        })?;
        Ok(decoded.items)
    }

    /// Refresh an access token with its refresh token
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or auth rejections; a
    /// [`MyTargetError::TokenLimitExceeded`] here calls for a token purge.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<MyTargetTokens, MyTargetError> {
        info!("refreshing MyTarget access token");
        self.token_request(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
        ])
        .await
    }

    /// Issue a fresh token pair through the client-credentials grant
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or auth rejections.
    pub async fn client_credentials_token(&self) -> Result<MyTargetTokens, MyTargetError> {
        info!("issuing MyTarget token via client credentials");
        self.token_request(vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
        ])
        .await
    }

    /// Delete all tokens issued to the application
    ///
    /// Frees the per-application token quota after a
    /// [`MyTargetError::TokenLimitExceeded`]; previously stored refresh
    /// tokens die with the purge.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn delete_tokens(&self) -> Result<(), MyTargetError> {
        info!("deleting all MyTarget tokens for this application");
        let url = self.endpoint(TOKEN_DELETE_PATH)?;
        let request = EndpointRequest::post(url.clone()).with_form(vec![
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
        ]);

        let response = execute(&self.http, request).await?;
        if !response.status.is_success() {
            return Err(self.auth_or_api_error(&response, url.as_str()));
        }
        Ok(())
    }

    async fn token_request(
        &self,
        fields: Vec<(String, String)>,
    ) -> Result<MyTargetTokens, MyTargetError> {
        let url = self.endpoint(TOKEN_PATH)?;
        let request = EndpointRequest::post(url.clone()).with_form(fields);

        let response = execute(&self.http, request).await?;
        let value = self.classify(&response, url.as_str())?;
        serde_json::from_value(value)
            .map_err(|error| MyTargetError::Protocol(format!("malformed token response: {error}")))
    }

    fn endpoint(&self, path: &str) -> Result<Url, MyTargetError> {
        Url::parse(&format!("{}{path}", self.config.base_url))
            .map_err(|error| MyTargetError::Config(format!("invalid endpoint URL: {error}")))
    }

    /// Classify status and auth sentinels, yielding the decoded JSON body
    fn classify(
        &self,
        response: &RawResponse,
        url: &str,
    ) -> Result<serde_json::Value, MyTargetError> {
        if response.status.is_success() {
            return decode_json(response).map_err(|error| {
                MyTargetError::Protocol(format!("undecodable response from {url}: {error}"))
            });
        }
        Err(self.auth_or_api_error(response, url))
    }

    fn auth_or_api_error(&self, response: &RawResponse, url: &str) -> MyTargetError {
        if response.status == StatusCode::UNAUTHORIZED
            || response.status == StatusCode::FORBIDDEN
        {
            if let Some(sentinel) = auth_sentinel(&response.body) {
                return match sentinel.as_str() {
                    INVALID_TOKEN => MyTargetError::InvalidToken,
                    EXPIRED_TOKEN => MyTargetError::ExpiredToken,
                    TOKEN_LIMIT_EXCEEDED => MyTargetError::TokenLimitExceeded,
                    other => MyTargetError::Api {
                        status: response.status.as_u16(),
                        url: url.to_string(),
                        message: other.to_string(),
                    },
                };
            }
        }
        MyTargetError::Api {
            status: response.status.as_u16(),
            url: url.to_string(),
            message: response.body.clone(),
        }
    }
}

/// Extract the auth sentinel from a rejection body
///
/// The body is either a bare JSON string, an object with a string `error`,
/// or an object nesting the code under `error.code`. Bodies that are not
/// valid JSON are treated as the sentinel itself, trimmed.
fn auth_sentinel(body: &str) -> Option<String> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(code)) => Some(code),
        Ok(serde_json::Value::Object(map)) => match map.get("error") {
            Some(serde_json::Value::String(code)) => Some(code.clone()),
            Some(serde_json::Value::Object(inner)) => inner
                .get("code")
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string),
            _ => None,
        },
        Ok(_) => None,
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable amount: {value}"))),
        serde_json::Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("unparseable amount: {value}"))),
        _ => Err(serde::de::Error::custom(format!(
            "unparseable amount: {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_parses_bare_string_body() {
        assert_eq!(auth_sentinel("\"expired_token\"").as_deref(), Some("expired_token"));
    }

    #[test]
    fn sentinel_parses_object_with_string_error() {
        assert_eq!(
            auth_sentinel(r#"{"error": "invalid_token"}"#).as_deref(),
            Some("invalid_token")
        );
    }

    #[test]
    fn sentinel_parses_nested_error_code() {
        assert_eq!(
            auth_sentinel(r#"{"error": {"code": "token_limit_exceeded", "message": "..."}}"#)
                .as_deref(),
            Some("token_limit_exceeded")
        );
    }

    #[test]
    fn sentinel_falls_back_to_raw_body() {
        assert_eq!(auth_sentinel(" expired_token \n").as_deref(), Some("expired_token"));
        assert!(auth_sentinel("").is_none());
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let error = MyTargetApiClient::new(MyTargetConfig::new("", "secret")).unwrap_err();
        assert!(matches!(error, MyTargetError::Config(_)));

        let error = MyTargetApiClient::new(MyTargetConfig::new("id", "  ")).unwrap_err();
        assert!(matches!(error, MyTargetError::Config(_)));
    }

    #[test]
    fn stat_rows_accept_string_and_missing_spent() {
        let decoded: DayStatisticsResponse = serde_json::from_value(serde_json::json!({
            "items": [
                {
                    "id": 42,
                    "rows": [
                        { "date": "2022-11-01", "base": { "spent": "15.25" } },
                        { "date": "2022-11-02", "base": {} }
                    ]
                }
            ]
        }))
        .unwrap();

        assert_eq!(decoded.items[0].rows.len(), 2);
        assert!((decoded.items[0].rows[0].base.spent - 15.25).abs() < f64::EPSILON);
        assert!(decoded.items[0].rows[1].base.spent.abs() < f64::EPSILON);
    }

    #[test]
    fn auth_errors_map_to_auth_variants() {
        let expired: ApiError = MyTargetError::ExpiredToken.into();
        assert!(expired.is_recoverable());
        assert!(expired.is_auth_error());

        let invalid: ApiError = MyTargetError::InvalidToken.into();
        assert!(!invalid.is_recoverable());
        assert!(invalid.is_auth_error());

        let limit: ApiError = MyTargetError::TokenLimitExceeded.into();
        assert!(matches!(
            limit,
            ApiError::Auth(AuthError::TokenLimitExceeded)
        ));
    }
}
