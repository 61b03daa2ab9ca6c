// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! External collaborator traits: the credential store and the record sink
//!
//! Both collaborators live outside the core (the dashboard application owns
//! the token table and the relational store); the core only reads tokens
//! before authenticated calls, rewrites them on refresh, and hands finished
//! records over for persistence.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use shared_types::Platform;

use crate::{ApiError, ClientRecord};

/// Stored OAuth credential for one user and platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Current access token
    pub access_token: String,
    /// Refresh token, where the platform issues one
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds, as reported by the platform
    pub expires_in: Option<u64>,
}

impl Credential {
    /// Create a credential holding only an access token
    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
        }
    }
}

/// Read/write access to persisted platform credentials
///
/// Callers must serialize collection runs per user and platform; the store
/// itself carries no optimistic-concurrency guard against lost updates on
/// token refresh.
pub trait CredentialStore: Send + Sync {
    /// Fetch the credential for a user and platform
    ///
    /// # Errors
    ///
    /// Fails with [`ApiError::CredentialStore`] when no credential exists or
    /// the store is unavailable.
    fn get(
        &self,
        user_id: u64,
        platform: Platform,
    ) -> impl Future<Output = Result<Credential, ApiError>> + Send;

    /// Replace the credential for a user and platform
    ///
    /// # Errors
    ///
    /// Fails with [`ApiError::CredentialStore`] when the store is
    /// unavailable.
    fn update(
        &self,
        user_id: u64,
        platform: Platform,
        credential: Credential,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

impl<S: CredentialStore> CredentialStore for Arc<S> {
    fn get(
        &self,
        user_id: u64,
        platform: Platform,
    ) -> impl Future<Output = Result<Credential, ApiError>> + Send {
        S::get(self, user_id, platform)
    }

    fn update(
        &self,
        user_id: u64,
        platform: Platform,
        credential: Credential,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        S::update(self, user_id, platform, credential)
    }
}

/// Persistence collaborator receiving the records of one platform run
///
/// Implementations are expected to upsert clients, daily statistics and
/// balances inside one atomic transaction per run.
pub trait RecordSink: Send + Sync {
    /// Persist all records of one platform run
    fn save(&self, records: &[ClientRecord]) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// In-memory credential store
///
/// Backs the integration tests and examples; production deployments
/// implement [`CredentialStore`] over their own token table.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<(u64, Platform), Credential>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with one credential
    pub fn with_credential(user_id: u64, platform: Platform, credential: Credential) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.credentials.lock() {
            map.insert((user_id, platform), credential);
        }
        store
    }
}

impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, user_id: u64, platform: Platform) -> Result<Credential, ApiError> {
        let map = self
            .credentials
            .lock()
            .map_err(|_| ApiError::credential_store("credential store lock poisoned"))?;
        map.get(&(user_id, platform)).cloned().ok_or_else(|| {
            ApiError::credential_store(format!(
                "no credential for user {user_id} on {platform}"
            ))
        })
    }

    async fn update(
        &self,
        user_id: u64,
        platform: Platform,
        credential: Credential,
    ) -> Result<(), ApiError> {
        let mut map = self
            .credentials
            .lock()
            .map_err(|_| ApiError::credential_store("credential store lock poisoned"))?;
        map.insert((user_id, platform), credential);
        Ok(())
    }
}
