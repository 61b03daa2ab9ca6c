// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Advertising platform API integrations
//!
//! This crate provides clients for the external advertising platforms the
//! aggregation core pulls spend data from:
//!
//! - **Yandex Direct**: v5 JSON API with `LimitedBy` pagination, asynchronous
//!   TSV reports polled via the `retryIn` header, and v4 Live account
//!   balances
//! - **VK Ads**: GET-per-method API with in-body errors and fixed-backoff
//!   rate-limit retries
//! - **MyTarget**: Bearer-token API with OAuth2 refresh, token purge and
//!   re-issue on auth rejections
//!
//! The [`collector`] module turns the raw clients into
//! [`api_client::SpendCollector`] implementations producing canonical
//! records, and runs them through the [`collector::CollectorRegistry`].

pub mod collector;
pub mod my_target;
pub mod transport;
pub mod vk;
pub mod yandex;

pub use collector::{
    CollectorRegistry, MyTargetCollector, PlatformOutcome, VkCollector, YandexCollector,
};
pub use my_target::{MyTargetApiClient, MyTargetConfig, MyTargetError};
pub use transport::{EndpointRequest, RawResponse, RequestBody, TransportFailure};
pub use vk::{VkApiClient, VkConfig, VkError};
pub use yandex::{YandexClient, YandexConfig, YandexError};
