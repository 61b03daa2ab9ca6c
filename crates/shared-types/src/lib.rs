// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Shared types for the ad-spend aggregation service
//!
//! This crate provides common types that are shared across multiple crates
//! in the aggregation workspace, avoiding circular dependencies.

pub mod platform;

pub use platform::{Platform, PlatformParseError};
