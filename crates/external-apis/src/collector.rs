// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Platform spend collectors and the collection registry
//!
//! One [`SpendCollector`] implementation per platform drives the listing,
//! statistics and balance phases against the platform client, normalizing
//! everything into [`ClientRecord`]s keyed the platform's native way: Yandex
//! by login, VK and MyTarget by numeric client id. The
//! [`CollectorRegistry`] runs the configured platforms sequentially and
//! isolates their failures from one another.

use api_client::{
    ApiError, Balance, ClientRecord, Credential, CredentialStore, RecordSet, RecordSink,
    SpendCollector, StatPoint,
};
use chrono::{NaiveDate, Utc};
use shared_types::Platform;
use tracing::{error, info};

use crate::{
    my_target::{MyTargetApiClient, MyTargetError, MyTargetTokens},
    vk::{StatisticsRequest, VkApiClient, with_rate_limit_retry},
    yandex::{AccountManagementRequest, AgencyClientsRequest, ReportRequest, YandexClient},
};

/// Spend collector for Yandex Direct
///
/// Records are keyed by client login; statistics come from per-client TSV
/// reports and balances from the v4 Live `AccountManagement` call, snapshot
/// at the collection date.
#[derive(Debug)]
pub struct YandexCollector<S> {
    client: YandexClient,
    store: S,
    user_id: u64,
}

impl<S: CredentialStore> YandexCollector<S> {
    /// Create a collector reading its token from the given store entry
    pub fn new(client: YandexClient, store: S, user_id: u64) -> Self {
        Self {
            client,
            store,
            user_id,
        }
    }
}

impl<S: CredentialStore> SpendCollector for YandexCollector<S> {
    fn platform(&self) -> Platform {
        Platform::YandexDirect
    }

    async fn collect(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<ClientRecord>, ApiError> {
        let credential = self.store.get(self.user_id, Platform::YandexDirect).await?;
        let token = credential.access_token;

        let listing = AgencyClientsRequest::active(self.client.config().page_limit);
        let clients = self.client.agency_clients(&token, &listing).await?;
        info!(clients = clients.len(), "listed Yandex Direct agency clients");

        let mut records: RecordSet<String> = RecordSet::new();
        for client in &clients {
            records.insert(
                client.login.clone(),
                ClientRecord::new(Platform::YandexDirect, client.client_id, &client.login),
            )?;
        }

        let report = ReportRequest::account_costs(date_from, date_to);
        for client in &clients {
            let rows = self.client.cost_report(&token, &client.login, &report).await?;
            for row in rows {
                let date = row
                    .get("Date")
                    .ok_or_else(|| ApiError::protocol("report row has no Date column"))?
                    .parse::<NaiveDate>()
                    .map_err(|error| {
                        ApiError::protocol(format!("unparseable report date: {error}"))
                    })?;
                let cost = row
                    .get("Cost")
                    .ok_or_else(|| ApiError::protocol("report row has no Cost column"))?
                    .parse::<f64>()
                    .map_err(|error| {
                        ApiError::protocol(format!("unparseable report cost: {error}"))
                    })?;
                records.push_stat(&client.login, StatPoint { date, cost })?;
            }
        }

        let balances_request = AccountManagementRequest {
            logins: records.keys().cloned().collect(),
        };
        let snapshot_date = Utc::now().date_naive();
        for balance in self.client.account_balances(&token, &balances_request).await? {
            records.set_balance(
                &balance.login,
                Balance {
                    amount: balance.amount,
                    date: snapshot_date,
                },
            )?;
        }

        Ok(records.into_records())
    }
}

/// Spend collector for VK Ads
///
/// Walks every advertising account visible to the token, lists its agency
/// clients, and fetches one per-day statistics batch per account. Every call
/// runs under the fixed-backoff rate-limit policy.
#[derive(Debug)]
pub struct VkCollector<S> {
    client: VkApiClient,
    store: S,
    user_id: u64,
}

impl<S: CredentialStore> VkCollector<S> {
    /// Create a collector reading its token from the given store entry
    pub fn new(client: VkApiClient, store: S, user_id: u64) -> Self {
        Self {
            client,
            store,
            user_id,
        }
    }
}

impl<S: CredentialStore> SpendCollector for VkCollector<S> {
    fn platform(&self) -> Platform {
        Platform::VkAds
    }

    async fn collect(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<ClientRecord>, ApiError> {
        let credential = self.store.get(self.user_id, Platform::VkAds).await?;
        let token = credential.access_token;
        let config = self.client.config().clone();

        let accounts = with_rate_limit_retry(&config, || {
            let client = &self.client;
            let token = &token;
            async move { client.accounts(token).await }
        })
        .await?;
        info!(accounts = accounts.len(), "listed VK advertising accounts");

        let mut records: RecordSet<i64> = RecordSet::new();
        for account in &accounts {
            let clients = with_rate_limit_retry(&config, || {
                let client = &self.client;
                let token = &token;
                async move { client.clients(token, account.account_id).await }
            })
            .await?;

            if clients.is_empty() {
                continue;
            }
            let ids: Vec<i64> = clients.iter().map(|client| client.id).collect();
            for client in clients {
                records.insert(
                    client.id,
                    ClientRecord::new(Platform::VkAds, client.id, client.name)
                        .with_account_id(account.account_id),
                )?;
            }

            let request = StatisticsRequest::daily(account.account_id, ids, date_from, date_to);
            let statistics = with_rate_limit_retry(&config, || {
                let client = &self.client;
                let token = &token;
                let request = &request;
                async move { client.statistics(token, request).await }
            })
            .await?;

            for item in statistics {
                for row in item.stats {
                    records.push_stat(
                        &item.id,
                        StatPoint {
                            date: row.day,
                            cost: row.spent,
                        },
                    )?;
                }
            }
        }

        Ok(records.into_records())
    }
}

/// Spend collector for MyTarget
///
/// Every authenticated call re-reads the credential from the store, so a
/// refresh persisted mid-run is picked up by the next attempt. Expired
/// tokens are refreshed in place; a token-limit rejection during refresh
/// purges the application's tokens and re-issues through the
/// client-credentials grant.
#[derive(Debug)]
pub struct MyTargetCollector<S> {
    client: MyTargetApiClient,
    store: S,
    user_id: u64,
}

impl<S: CredentialStore> MyTargetCollector<S> {
    /// Create a collector reading its tokens from the given store entry
    pub fn new(client: MyTargetApiClient, store: S, user_id: u64) -> Self {
        Self {
            client,
            store,
            user_id,
        }
    }

    /// Run an authenticated call under the token-recovery policy
    async fn with_token_recovery<T, F, Fut>(&self, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, MyTargetError>>,
    {
        let max_attempts = self.client.config().max_attempts;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let credential = self.store.get(self.user_id, Platform::MyTarget).await?;
            match call(credential.access_token.clone()).await {
                Ok(value) => return Ok(value),
                Err(MyTargetError::ExpiredToken) => {
                    if attempts >= max_attempts {
                        return Err(ApiError::ExhaustedRetries { attempts });
                    }
                    info!(attempts, "MyTarget token expired, recovering");
                    self.recover_expired(&credential).await?;
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Obtain fresh tokens and persist them before the next attempt
    async fn recover_expired(&self, credential: &Credential) -> Result<(), ApiError> {
        let tokens = match credential.refresh_token.as_deref() {
            Some(refresh_token) => match self.client.refresh_token(refresh_token).await {
                Ok(tokens) => tokens,
                Err(MyTargetError::TokenLimitExceeded) => self.reissue().await?,
                Err(other) => return Err(other.into()),
            },
            None => self.reissue().await?,
        };

        self.store
            .update(
                self.user_id,
                Platform::MyTarget,
                Credential {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    expires_in: tokens.expires_in,
                },
            )
            .await
    }

    /// Purge the application's tokens and issue a fresh pair
    ///
    /// One-shot: if the client-credentials grant fails after the purge, the
    /// run fails.
    async fn reissue(&self) -> Result<MyTargetTokens, ApiError> {
        self.client.delete_tokens().await?;
        Ok(self.client.client_credentials_token().await?)
    }
}

impl<S: CredentialStore> SpendCollector for MyTargetCollector<S> {
    fn platform(&self) -> Platform {
        Platform::MyTarget
    }

    async fn collect(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Result<Vec<ClientRecord>, ApiError> {
        let clients = self
            .with_token_recovery(|token| {
                let client = &self.client;
                async move { client.agency_clients(&token).await }
            })
            .await?;
        info!(clients = clients.len(), "listed MyTarget agency clients");

        let mut records: RecordSet<i64> = RecordSet::new();
        let ids: Vec<i64> = clients.iter().map(|client| client.id).collect();
        for client in clients {
            records.insert(
                client.id,
                ClientRecord::new(Platform::MyTarget, client.id, client.name),
            )?;
        }

        let statistics = self
            .with_token_recovery(|token| {
                let client = &self.client;
                let ids = &ids;
                async move { client.day_statistics(&token, ids, date_from, date_to).await }
            })
            .await?;

        for item in statistics {
            for row in item.rows {
                records.push_stat(
                    &item.id,
                    StatPoint {
                        date: row.date,
                        cost: row.base.spent,
                    },
                )?;
            }
        }

        Ok(records.into_records())
    }
}

/// Result of one platform's collection run
#[derive(Debug)]
pub struct PlatformOutcome {
    /// The platform that ran
    pub platform: Platform,
    /// Records on success, the run's error otherwise
    pub result: Result<Vec<ClientRecord>, ApiError>,
}

/// Registry of the configured platform collectors
///
/// Platforms run one after another; a failing platform never aborts the
/// others, its error is carried in the outcome instead.
#[derive(Debug, Default)]
pub struct CollectorRegistry<S> {
    yandex: Option<YandexCollector<S>>,
    vk: Option<VkCollector<S>>,
    my_target: Option<MyTargetCollector<S>>,
}

impl<S: CredentialStore> CollectorRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            yandex: None,
            vk: None,
            my_target: None,
        }
    }

    /// Register the Yandex Direct collector
    #[must_use]
    pub fn with_yandex(mut self, collector: YandexCollector<S>) -> Self {
        self.yandex = Some(collector);
        self
    }

    /// Register the VK Ads collector
    #[must_use]
    pub fn with_vk(mut self, collector: VkCollector<S>) -> Self {
        self.vk = Some(collector);
        self
    }

    /// Register the MyTarget collector
    #[must_use]
    pub fn with_my_target(mut self, collector: MyTargetCollector<S>) -> Self {
        self.my_target = Some(collector);
        self
    }

    /// Collect from every configured platform, isolating failures
    pub async fn collect_all(
        &self,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Vec<PlatformOutcome> {
        let mut outcomes = Vec::new();
        if let Some(collector) = &self.yandex {
            outcomes.push(run(collector, date_from, date_to).await);
        }
        if let Some(collector) = &self.vk {
            outcomes.push(run(collector, date_from, date_to).await);
        }
        if let Some(collector) = &self.my_target {
            outcomes.push(run(collector, date_from, date_to).await);
        }
        outcomes
    }

    /// Collect from every configured platform and persist successful runs
    ///
    /// # Errors
    ///
    /// Fails when the sink rejects a save; platform errors stay in the
    /// outcomes.
    pub async fn collect_and_save<W: RecordSink>(
        &self,
        sink: &W,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> anyhow::Result<Vec<PlatformOutcome>> {
        let outcomes = self.collect_all(date_from, date_to).await;
        for outcome in &outcomes {
            if let Ok(records) = &outcome.result
                && !records.is_empty()
            {
                info!(
                    platform = %outcome.platform,
                    records = records.len(),
                    "persisting platform records"
                );
                sink.save(records).await?;
            }
        }
        Ok(outcomes)
    }
}

async fn run<C: SpendCollector>(
    collector: &C,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> PlatformOutcome {
    let platform = collector.platform();
    info!(%platform, %date_from, %date_to, "collecting platform spend");
    let result = collector.collect(date_from, date_to).await;
    if let Err(error) = &result {
        error!(%platform, %error, "platform collection failed");
    }
    PlatformOutcome { platform, result }
}
