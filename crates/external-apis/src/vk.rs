// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! VK Ads API integration
//!
//! VK exposes one GET endpoint per method under `api.vk.com/method/`; the
//! access token and API version travel as query parameters, and errors arrive
//! in the body (`{"error": {"error_code": ..., "error_msg": ...}}`) even on
//! HTTP 200. Rate limiting is signalled through error codes 9 (flood control)
//! and 6 (too many requests per second); [`with_rate_limit_retry`] converts
//! those into fixed-backoff retries.

use std::time::Duration;

use api_client::{ApiError, RateLimitError};
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::transport::{EndpointRequest, TransportFailure, decode_json, execute};

const DEFAULT_API_URL: &str = "https://api.vk.com/method/";
const DEFAULT_API_VERSION: &str = "5.131";
const OAUTH_AUTHORIZE_URL: &str = "https://oauth.vk.com/authorize";
const OAUTH_TOKEN_URL: &str = "https://oauth.vk.com/access_token";

const FLOOD_ERROR_CODE: i64 = 9;
const PER_SECOND_ERROR_CODE: i64 = 6;

/// Hard cap VK enforces on ids per `ads.getStatistics` call
pub const MAX_STATISTICS_IDS: usize = 2000;

const DEFAULT_FLOOD_BACKOFF_SECONDS: u64 = 60;
const DEFAULT_PER_SECOND_BACKOFF_SECONDS: u64 = 20;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Configuration for the VK Ads API client
#[derive(Debug, Clone)]
pub struct VkConfig {
    /// Base URL for method calls (trailing slash included)
    pub api_url: String,
    /// API version sent with every call
    pub api_version: String,
    /// Sleep after a flood-control rejection
    pub flood_backoff: Duration,
    /// Sleep after a requests-per-second rejection
    pub per_second_backoff: Duration,
    /// Attempts per call before rate limiting is treated as fatal
    pub max_attempts: u32,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for VkConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            flood_backoff: Duration::from_secs(DEFAULT_FLOOD_BACKOFF_SECONDS),
            per_second_backoff: Duration::from_secs(DEFAULT_PER_SECOND_BACKOFF_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// Errors specific to the VK Ads API client
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum VkError {
    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportFailure),

    /// Error code 9: flood control
    #[error("flood control triggered")]
    FloodControl,

    /// Error code 6: too many requests per second
    #[error("too many requests per second")]
    TooManyRequestsPerSecond,

    /// Rate-limit retries ran out
    #[error("rate limited after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// In-body API error with any other code
    #[error("VK API error {code} from {url}: {message}")]
    Api {
        code: i64,
        url: String,
        message: String,
    },

    /// Non-success HTTP status
    #[error("HTTP error {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    /// Statistics request exceeds the per-call id cap
    #[error("statistics request carries {count} ids, the API caps at {MAX_STATISTICS_IDS}")]
    TooManyIds { count: usize },

    /// Response shape did not match the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<VkError> for ApiError {
    fn from(value: VkError) -> Self {
        match value {
            VkError::Transport(failure) => failure.into(),
            VkError::FloodControl => ApiError::RateLimit(RateLimitError::FloodControl),
            VkError::TooManyRequestsPerSecond => {
                ApiError::RateLimit(RateLimitError::TooManyRequestsPerSecond)
            }
            VkError::Exhausted { attempts } => ApiError::ExhaustedRetries { attempts },
            VkError::Api { code, url, message } => ApiError::Api {
                status: 200,
                url,
                message: format!("error_code {code}: {message}"),
            },
            VkError::Http {
                status,
                url,
                message,
            } => ApiError::Api {
                status,
                url,
                message,
            },
            error @ VkError::TooManyIds { .. } => ApiError::configuration(error.to_string()),
            VkError::Protocol(message) => ApiError::Protocol { message },
            VkError::Config(message) => ApiError::Configuration { message },
        }
    }
}

/// One advertising account visible to the token
#[derive(Debug, Clone, Deserialize)]
pub struct VkAccount {
    /// Numeric account id
    pub account_id: i64,
    /// Account display name, where VK reports one
    #[serde(default)]
    pub account_name: Option<String>,
}

/// One agency client within an advertising account
#[derive(Debug, Clone, Deserialize)]
pub struct VkClientItem {
    /// Numeric client id
    pub id: i64,
    /// Client display name
    pub name: String,
}

/// Statistics for one requested id
#[derive(Debug, Clone, Deserialize)]
pub struct VkStatisticsItem {
    /// The id the statistics belong to
    pub id: i64,
    /// Per-period rows; empty when the client had no activity
    #[serde(default)]
    pub stats: Vec<VkStatRow>,
}

/// One per-day statistics row
#[derive(Debug, Clone, Deserialize)]
pub struct VkStatRow {
    /// Statistics date
    pub day: NaiveDate,
    /// Spend for that day; VK omits the field on zero-spend days and sends
    /// it as a string when present
    #[serde(default, deserialize_with = "flexible_f64")]
    pub spent: f64,
}

/// Parameters for `ads.getStatistics`
#[derive(Debug, Clone)]
pub struct StatisticsRequest {
    /// Advertising account the ids belong to
    pub account_id: i64,
    /// Client ids to request statistics for
    pub ids: Vec<i64>,
    /// Type of the requested ids
    pub ids_type: String,
    /// Aggregation period
    pub period: String,
    /// First statistics date
    pub date_from: NaiveDate,
    /// Last statistics date
    pub date_to: NaiveDate,
}

impl StatisticsRequest {
    /// Per-day client statistics for one account
    pub fn daily(account_id: i64, ids: Vec<i64>, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            account_id,
            ids,
            ids_type: "client".to_string(),
            period: "day".to_string(),
            date_from,
            date_to,
        }
    }

    /// Render the query parameters, enforcing the id cap up front
    ///
    /// # Errors
    ///
    /// Fails with [`VkError::TooManyIds`] when more than
    /// [`MAX_STATISTICS_IDS`] ids are requested.
    pub fn params(&self) -> Result<Vec<(String, String)>, VkError> {
        if self.ids.len() > MAX_STATISTICS_IDS {
            return Err(VkError::TooManyIds {
                count: self.ids.len(),
            });
        }
        let ids = self
            .ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Ok(vec![
            ("account_id".to_string(), self.account_id.to_string()),
            ("ids_type".to_string(), self.ids_type.clone()),
            ("ids".to_string(), ids),
            ("period".to_string(), self.period.clone()),
            (
                "date_from".to_string(),
                self.date_from.format("%Y-%m-%d").to_string(),
            ),
            (
                "date_to".to_string(),
                self.date_to.format("%Y-%m-%d").to_string(),
            ),
        ])
    }
}

/// OAuth token returned by the VK OAuth endpoint
#[derive(Debug, Clone)]
pub struct VkOAuthToken {
    /// Access token
    pub access_token: String,
    /// Token lifetime in seconds; zero means non-expiring
    pub expires_in: u64,
    /// Id of the user the token belongs to
    pub user_id: Option<i64>,
}

/// VK Ads API client
#[derive(Debug)]
pub struct VkApiClient {
    http: Client,
    config: VkConfig,
}

impl VkApiClient {
    /// Create a new VK Ads API client
    ///
    /// # Errors
    ///
    /// Returns an error if the configured URL is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: VkConfig) -> Result<Self, VkError> {
        Url::parse(&config.api_url)
            .map_err(|error| VkError::Config(format!("invalid api_url: {error}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("adspend-api/0.1.0")
            .build()
            .map_err(TransportFailure::Http)?;

        Ok(Self { http, config })
    }

    /// The active configuration
    pub fn config(&self) -> &VkConfig {
        &self.config
    }

    /// List the advertising accounts visible to the token
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn accounts(&self, access_token: &str) -> Result<Vec<VkAccount>, VkError> {
        let response = self.call(access_token, "ads.getAccounts", &[]).await?;
        serde_json::from_value(response)
            .map_err(|error| VkError::Protocol(format!("malformed accounts response: {error}")))
    }

    /// List the agency clients of one advertising account
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn clients(
        &self,
        access_token: &str,
        account_id: i64,
    ) -> Result<Vec<VkClientItem>, VkError> {
        let params = [("account_id".to_string(), account_id.to_string())];
        let response = self.call(access_token, "ads.getClients", &params).await?;
        serde_json::from_value(response)
            .map_err(|error| VkError::Protocol(format!("malformed clients response: {error}")))
    }

    /// Fetch per-day statistics for up to [`MAX_STATISTICS_IDS`] clients in
    /// one call
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, API errors, or an exceeded id
    /// cap.
    pub async fn statistics(
        &self,
        access_token: &str,
        request: &StatisticsRequest,
    ) -> Result<Vec<VkStatisticsItem>, VkError> {
        let params = request.params()?;
        let response = self
            .call(access_token, "ads.getStatistics", &params)
            .await?;
        serde_json::from_value(response).map_err(|error| {
            VkError::Protocol(format!("malformed statistics response: {error}"))
        })
    }

    /// Fetch the remaining budget of one advertising account
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, API errors, or an unparseable
    /// budget amount.
    pub async fn budget(&self, access_token: &str, account_id: i64) -> Result<f64, VkError> {
        let params = [("account_id".to_string(), account_id.to_string())];
        let response = self.call(access_token, "ads.getBudget", &params).await?;
        amount_from_value(&response)
            .ok_or_else(|| VkError::Protocol(format!("unparseable budget: {response}")))
    }

    /// Perform one method call, classifying in-body errors
    async fn call(
        &self,
        access_token: &str,
        method: &str,
        params: &[(String, String)],
    ) -> Result<serde_json::Value, VkError> {
        let url = Url::parse(&format!("{}{method}", self.config.api_url))
            .map_err(|error| VkError::Config(format!("invalid method URL: {error}")))?;

        let mut request = EndpointRequest::get(url.clone())
            .with_query("access_token", access_token)
            .with_query("v", &self.config.api_version);
        for (name, value) in params {
            request = request.with_query(name, value);
        }

        let response = execute(&self.http, request).await?;
        if !response.status.is_success() {
            return Err(VkError::Http {
                status: response.status.as_u16(),
                url: url.to_string(),
                message: response.body,
            });
        }

        let value = decode_json(&response)
            .map_err(|error| VkError::Protocol(format!("undecodable {method} response: {error}")))?;

        if let Some(error) = value.get("error") {
            let code = error
                .get("error_code")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(-1);
            let message = error
                .get("error_msg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown API error")
                .to_string();
            debug!(method, code, message, "VK API error");
            return Err(match code {
                FLOOD_ERROR_CODE => VkError::FloodControl,
                PER_SECOND_ERROR_CODE => VkError::TooManyRequestsPerSecond,
                code => VkError::Api {
                    code,
                    url: url.to_string(),
                    message,
                },
            });
        }

        value.get("response").cloned().ok_or_else(|| {
            VkError::Protocol(format!("{method} response carries neither response nor error"))
        })
    }
}

/// Run a call under the fixed-backoff rate-limit policy
///
/// Flood-control rejections sleep [`VkConfig::flood_backoff`], per-second
/// rejections sleep [`VkConfig::per_second_backoff`]; any other outcome is
/// returned as-is. After [`VkConfig::max_attempts`] rate-limited calls the
/// retry gives up with [`VkError::Exhausted`].
///
/// # Errors
///
/// Propagates the wrapped call's errors; rate-limit errors only surface as
/// [`VkError::Exhausted`].
pub async fn with_rate_limit_retry<T, F, Fut>(config: &VkConfig, mut call: F) -> Result<T, VkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VkError>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match call().await {
            Err(VkError::FloodControl) => {
                if attempts >= config.max_attempts {
                    return Err(VkError::Exhausted { attempts });
                }
                warn!(attempts, "flood control, backing off");
                sleep(config.flood_backoff).await;
            }
            Err(VkError::TooManyRequestsPerSecond) => {
                if attempts >= config.max_attempts {
                    return Err(VkError::Exhausted { attempts });
                }
                warn!(attempts, "per-second limit, backing off");
                sleep(config.per_second_backoff).await;
            }
            other => return other,
        }
    }
}

/// Build the OAuth authorization URL for the `ads` scope
///
/// # Errors
///
/// Returns an error only if the static OAuth URL fails to parse.
pub fn authorize_url(client_id: &str, redirect_uri: &str) -> Result<Url, VkError> {
    let mut url = Url::parse(OAUTH_AUTHORIZE_URL)
        .map_err(|error| VkError::Config(format!("invalid OAuth URL: {error}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", "ads,offline")
        .append_pair("response_type", "code")
        .append_pair("display", "page");
    Ok(url)
}

/// Exchange an authorization code for an access token
///
/// # Errors
///
/// Returns an error when the response carries an in-body error, no access
/// token, or a non-integer `expires_in`.
pub async fn exchange_code_for_token(
    http: &Client,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<VkOAuthToken, VkError> {
    let url = Url::parse(OAUTH_TOKEN_URL)
        .map_err(|error| VkError::Config(format!("invalid OAuth URL: {error}")))?;
    let request = EndpointRequest::get(url.clone())
        .with_query("client_id", client_id)
        .with_query("client_secret", client_secret)
        .with_query("redirect_uri", redirect_uri)
        .with_query("code", code);

    let response = execute(http, request).await?;
    let value = decode_json(&response)
        .map_err(|error| VkError::Protocol(format!("undecodable OAuth response: {error}")))?;
    parse_oauth_token(&value, url.as_str())
}

/// Validate and extract the OAuth token from a decoded response
fn parse_oauth_token(value: &serde_json::Value, url: &str) -> Result<VkOAuthToken, VkError> {
    if let Some(error) = value.get("error") {
        let description = value
            .get("error_description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");
        return Err(VkError::Api {
            code: -1,
            url: url.to_string(),
            message: format!("error: {error}, error_description: {description}"),
        });
    }

    let access_token = value
        .get("access_token")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| VkError::Protocol("OAuth response has no access_token".to_string()))?
        .to_string();
    let expires_in = value
        .get("expires_in")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            VkError::Protocol("OAuth response has no integer expires_in".to_string())
        })?;
    let user_id = value.get("user_id").and_then(serde_json::Value::as_i64);

    Ok(VkOAuthToken {
        access_token,
        expires_in,
        user_id,
    })
}

/// Read an amount VK sends either as a number or a numeric string
fn amount_from_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Null => Ok(0.0),
        other => amount_from_value(other)
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable amount: {value}"))),
    }
}
