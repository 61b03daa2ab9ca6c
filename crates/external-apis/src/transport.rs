// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport primitives shared by the platform clients
//!
//! One [`EndpointRequest`] describes one API call; [`execute`] performs it
//! and hands back a decoded-enough [`RawResponse`]. Status-code and in-body
//! error classification stays in the platform modules, and no retries happen
//! here: retry policy belongs to the orchestration layer.

use std::time::Duration;

use api_client::ApiError;
use reqwest::{Client, Method, StatusCode, header::HeaderMap};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Body payload of an [`EndpointRequest`]
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON body, sent with `Content-Type: application/json`
    Json(serde_json::Value),
    /// URL-encoded form body
    Form(Vec<(String, String)>),
}

/// A fully described API call, immutable once sent
///
/// Endpoint descriptors render themselves into this shape; adding a new
/// descriptor never requires touching the transport.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    /// HTTP verb; only GET and POST are executable
    pub method: Method,
    /// Absolute endpoint URL
    pub url: Url,
    /// Request headers as name/value pairs
    pub headers: Vec<(String, String)>,
    /// Query-string parameters
    pub query: Vec<(String, String)>,
    /// Optional request body
    pub body: Option<RequestBody>,
}

impl EndpointRequest {
    /// Create a GET request for the given URL
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request for the given URL
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create a request with an arbitrary verb
    ///
    /// Anything other than GET or POST is rejected by [`execute`] with
    /// [`TransportFailure::UnknownMethod`].
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Append a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body
    #[must_use]
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Set a URL-encoded form body
    #[must_use]
    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }
}

/// Response envelope consumed within one call
#[derive(Debug)]
pub struct RawResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw response body text
    pub body: String,
}

impl RawResponse {
    /// Read a retry-interval header as whole seconds, falling back to a
    /// default when the header is missing or unparseable
    pub fn retry_interval(&self, header: &str, default: Duration) -> Duration {
        self.headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }
}

/// Failures of the transport itself, before any platform classification
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The descriptor carried a verb the transport does not execute
    #[error("unknown HTTP method: {0}")]
    UnknownMethod(Method),

    /// The underlying HTTP call failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<TransportFailure> for ApiError {
    fn from(value: TransportFailure) -> Self {
        match value {
            TransportFailure::UnknownMethod(method) => ApiError::UnknownMethod {
                method: method.to_string(),
            },
            TransportFailure::Http(error) => ApiError::transport(error),
        }
    }
}

/// Execute a single API call
///
/// No retries, no classification beyond the verb check: callers inspect the
/// returned status and body themselves.
///
/// # Errors
///
/// Fails with [`TransportFailure::UnknownMethod`] for verbs other than GET
/// or POST, and [`TransportFailure::Http`] for connection-level errors.
pub async fn execute(
    client: &Client,
    request: EndpointRequest,
) -> Result<RawResponse, TransportFailure> {
    let builder = if request.method == Method::GET {
        client.get(request.url.clone())
    } else if request.method == Method::POST {
        client.post(request.url.clone())
    } else {
        return Err(TransportFailure::UnknownMethod(request.method));
    };

    debug!(method = %request.method, url = %request.url, "issuing API request");

    let mut builder = builder;
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match request.body {
        Some(RequestBody::Json(ref value)) => builder.json(value),
        Some(RequestBody::Form(ref fields)) => builder.form(fields),
        None => builder,
    };

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await?;

    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

/// Decode a response body as JSON
///
/// # Errors
///
/// Fails with [`ApiError::Protocol`] when the body is not valid JSON.
pub fn decode_json(response: &RawResponse) -> Result<serde_json::Value, ApiError> {
    serde_json::from_str(&response.body).map_err(|error| {
        ApiError::protocol(format!(
            "response body is not valid JSON ({error}): {}",
            truncate(&response.body, 200)
        ))
    })
}

fn truncate(body: &str, limit: usize) -> &str {
    match body.char_indices().nth(limit) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[tokio::test]
    async fn unknown_method_is_rejected_without_a_network_call() {
        let client = Client::new();
        // Port 9 is discard; the request must fail before any connection.
        let url = Url::parse("http://127.0.0.1:9/method").unwrap();
        let request = EndpointRequest::new(Method::DELETE, url);

        let error = execute(&client, request).await.unwrap_err();
        assert!(matches!(error, TransportFailure::UnknownMethod(_)));

        let api_error: ApiError = error.into();
        assert!(matches!(api_error, ApiError::UnknownMethod { .. }));
    }

    #[test]
    fn retry_interval_reads_header_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retryIn", HeaderValue::from_static("5"));
        let response = RawResponse {
            status: StatusCode::ACCEPTED,
            headers,
            body: String::new(),
        };

        assert_eq!(
            response.retry_interval("retryIn", Duration::from_secs(60)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn retry_interval_falls_back_to_default() {
        let response = RawResponse {
            status: StatusCode::ACCEPTED,
            headers: HeaderMap::new(),
            body: String::new(),
        };

        assert_eq!(
            response.retry_interval("retryIn", Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn decode_json_reports_protocol_errors() {
        let response = RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: "not json".to_string(),
        };

        let error = decode_json(&response).unwrap_err();
        assert!(matches!(error, ApiError::Protocol { .. }));
    }

    #[test]
    fn builder_accumulates_request_parts() {
        let url = Url::parse("https://api.vk.com/method/ads.getAccounts").unwrap();
        let request = EndpointRequest::get(url)
            .with_query("access_token", "token")
            .with_query("v", "5.131")
            .with_header("Accept", "application/json");

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query.len(), 2);
        assert_eq!(request.headers.len(), 1);
        assert!(request.body.is_none());
    }
}
