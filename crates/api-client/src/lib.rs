// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Collector traits and canonical record types for ad platform integrations
//!
//! This crate provides the platform-independent contracts of the ad-spend
//! aggregation core:
//!
//! - **`SpendCollector` Trait**: one strategy object per advertising platform,
//!   returning canonical records for a collection run
//! - **Error Taxonomy**: [`ApiError`] with authentication, rate-limit,
//!   transport, protocol, retry-exhaustion and data-integrity classes
//! - **Canonical Records**: [`ClientRecord`] with per-day cost statistics and
//!   balance snapshots, accumulated through the order-preserving [`RecordSet`]
//! - **External Collaborators**: [`CredentialStore`] and [`RecordSink`] traits
//!   for the token store and the persistence layer that surround the core

use chrono::NaiveDate;
use shared_types::Platform;
use thiserror::Error;

pub mod store;
pub mod types;

pub use store::*;
pub use types::*;

/// Strategy object collecting spend data for one advertising platform
///
/// Implementations drive their platform's endpoints through pagination and
/// retry orchestration, normalize the responses, and return the canonical
/// records for one collection run. Runs are sequential: one platform, one
/// page, one retry attempt at a time.
pub trait SpendCollector: Send + Sync {
    /// The platform this collector talks to
    fn platform(&self) -> Platform;

    /// Collect canonical records for the given statistics period
    ///
    /// # Errors
    ///
    /// Returns an error when the platform run fails; recoverable failures
    /// (token expiry, rate limiting) are retried internally and only surface
    /// once the platform's attempt budget is exhausted.
    fn collect(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ClientRecord>, ApiError>> + Send;
}

/// Authentication failure kinds reported by the platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The access token is malformed or revoked
    #[error("invalid access token")]
    InvalidToken,

    /// The access token has expired and must be refreshed
    #[error("expired access token")]
    ExpiredToken,

    /// The platform refuses to issue further tokens
    #[error("token limit exceeded")]
    TokenLimitExceeded,
}

/// Rate-limit failure kinds reported by the platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// Flood control engaged; a long cooldown is required
    #[error("flood control engaged")]
    FloodControl,

    /// Too many requests within one second
    #[error("too many requests per second")]
    TooManyRequestsPerSecond,
}

/// Common errors that can occur when working with platform API clients
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ApiError {
    /// Network or connection-level failure
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The configured HTTP verb is neither GET nor POST
    ///
    /// This is a programming error in an endpoint descriptor and is never
    /// retried.
    #[error("unknown HTTP method: {method}")]
    UnknownMethod { method: String },

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The platform rate-limited the call
    #[error("rate limited: {0}")]
    RateLimit(#[from] RateLimitError),

    /// Any other non-2xx status or in-body error, with diagnostic context
    #[error("API error (status {status}) from {url}: {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    /// The response body had an unexpected shape
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A bounded retry loop ran out of attempts
    #[error("retry budget exhausted after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// A response referenced a client unknown to the current run
    #[error("data integrity error: {message}")]
    DataIntegrity { message: String },

    /// Invalid client configuration or request parameters
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The credential store collaborator failed
    #[error("credential store error: {message}")]
    CredentialStore { message: String },
}

impl ApiError {
    /// Create a transport error
    pub fn transport<T: ToString>(message: T) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    /// Create a protocol error
    pub fn protocol<T: ToString>(message: T) -> Self {
        Self::Protocol {
            message: message.to_string(),
        }
    }

    /// Create a data-integrity error
    pub fn data_integrity<T: ToString>(message: T) -> Self {
        Self::DataIntegrity {
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration<T: ToString>(message: T) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    /// Create a credential-store error
    pub fn credential_store<T: ToString>(message: T) -> Self {
        Self::CredentialStore {
            message: message.to_string(),
        }
    }

    /// Check if the orchestrator may recover from this error locally
    ///
    /// Expired tokens are recovered by refresh-and-retry, rate limits by
    /// sleep-and-retry. Everything else propagates to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ApiError::Auth(AuthError::ExpiredToken) | ApiError::RateLimit(_)
        )
    }

    /// Check if this error indicates an authentication problem
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    /// Check if this error indicates the platform rate-limited the call
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::RateLimit(_))
    }
}
