// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Canonical record types built by the platform normalizers

use std::{collections::HashMap, fmt, hash::Hash};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared_types::Platform;

use crate::ApiError;

/// One day of spend for an agency client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatPoint {
    /// Statistics date
    pub date: NaiveDate,
    /// Spend for that date, in the platform's account currency
    pub cost: f64,
}

/// A balance snapshot for an agency client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Remaining account balance
    pub amount: f64,
    /// Date the snapshot was taken
    pub date: NaiveDate,
}

/// Canonical record for one agency client within one collection run
///
/// Built incrementally by a platform normalizer: the client-listing phase
/// inserts the record, the statistics phase appends [`StatPoint`]s, and the
/// balance phase (where the platform has one) attaches a [`Balance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Source platform tag
    pub platform: Platform,
    /// The platform's external client id
    pub client_id: i64,
    /// Client display name or login
    pub name: String,
    /// Parent advertising account id, where the platform has one (VK)
    pub account_id: Option<i64>,
    /// Per-day cost statistics, in arrival order
    pub stats: Vec<StatPoint>,
    /// Balance snapshot, where the platform reports one
    pub balance: Option<Balance>,
}

impl ClientRecord {
    /// Create a record with no statistics or balance yet
    pub fn new(platform: Platform, client_id: i64, name: impl Into<String>) -> Self {
        Self {
            platform,
            client_id,
            name: name.into(),
            account_id: None,
            stats: Vec::new(),
            balance: None,
        }
    }

    /// Attach the parent advertising account id
    #[must_use]
    pub fn with_account_id(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// Total spend across all collected statistic points
    pub fn total_cost(&self) -> f64 {
        self.stats.iter().map(|point| point.cost).sum()
    }
}

/// Insertion-ordered accumulator for the records of one platform run
///
/// Keyed by the platform's native client key: Yandex matches statistics and
/// balances back by login, VK and MyTarget by numeric client id. Duplicate
/// inserts and references to unknown keys are data-integrity faults, never
/// silent.
#[derive(Debug)]
pub struct RecordSet<K> {
    order: Vec<K>,
    records: HashMap<K, ClientRecord>,
}

impl<K> RecordSet<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    /// Create an empty record set
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            records: HashMap::new(),
        }
    }

    /// Number of clients in the set
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set holds no clients
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert the record for a newly listed client
    ///
    /// # Errors
    ///
    /// Fails with [`ApiError::DataIntegrity`] if the key was already
    /// inserted during this run.
    pub fn insert(&mut self, key: K, record: ClientRecord) -> Result<(), ApiError> {
        if self.records.contains_key(&key) {
            return Err(ApiError::data_integrity(format!(
                "client already exists in this run: {key}"
            )));
        }
        self.order.push(key.clone());
        self.records.insert(key, record);
        Ok(())
    }

    /// Append a statistic point to an already listed client
    ///
    /// # Errors
    ///
    /// Fails with [`ApiError::DataIntegrity`] if no client with this key was
    /// inserted during the listing phase.
    pub fn push_stat(&mut self, key: &K, point: StatPoint) -> Result<(), ApiError> {
        let record = self.records.get_mut(key).ok_or_else(|| {
            ApiError::data_integrity(format!("statistics reference unknown client: {key}"))
        })?;
        record.stats.push(point);
        Ok(())
    }

    /// Attach a balance snapshot to an already listed client
    ///
    /// # Errors
    ///
    /// Fails with [`ApiError::DataIntegrity`] if no client with this key was
    /// inserted during the listing phase.
    pub fn set_balance(&mut self, key: &K, balance: Balance) -> Result<(), ApiError> {
        let record = self.records.get_mut(key).ok_or_else(|| {
            ApiError::data_integrity(format!("balance references unknown client: {key}"))
        })?;
        record.balance = Some(balance);
        Ok(())
    }

    /// Iterate keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Consume the set, yielding records in insertion order
    pub fn into_records(mut self) -> Vec<ClientRecord> {
        self.order
            .drain(..)
            .filter_map(|key| self.records.remove(&key))
            .collect()
    }
}

impl<K> Default for RecordSet<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}
