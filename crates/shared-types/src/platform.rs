// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Advertising platform identifiers
//!
//! This module provides type-safe identifiers for the advertising platforms
//! the aggregation service collects spend data from.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Supported advertising platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Yandex Direct agency API
    YandexDirect,
    /// VK advertising API
    VkAds,
    /// MyTarget (target.my.com) advertising API
    MyTarget,
}

/// Error returned when parsing an unknown platform name
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct PlatformParseError(pub String);

impl Platform {
    /// Returns the stable wire/storage name of the platform
    ///
    /// These names are used as the `source` tag on canonical records and
    /// as keys in the credential store.
    pub const fn name(self) -> &'static str {
        match self {
            Self::YandexDirect => "yandex_direct",
            Self::VkAds => "vk_ads",
            Self::MyTarget => "my_target",
        }
    }

    /// Returns a human-readable display name
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::YandexDirect => "Yandex Direct",
            Self::VkAds => "VK ADS",
            Self::MyTarget => "myTarget",
        }
    }

    /// Returns all supported platforms, in collection order
    pub const fn all() -> &'static [Self] {
        &[Self::YandexDirect, Self::VkAds, Self::MyTarget]
    }

    /// Returns whether statistics for this platform arrive through an
    /// asynchronous report that must be polled
    pub const fn uses_async_reports(self) -> bool {
        matches!(self, Self::YandexDirect)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yandex_direct" => Ok(Self::YandexDirect),
            "vk_ads" => Ok(Self::VkAds),
            "my_target" => Ok(Self::MyTarget),
            other => Err(PlatformParseError(other.to_string())),
        }
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_names_round_trip() {
        for &platform in Platform::all() {
            let parsed: Platform = platform.name().parse().unwrap();
            assert_eq!(parsed, platform);
        }
    }

    #[test]
    fn unknown_platform_fails_to_parse() {
        let result: Result<Platform, _> = "google_ads".parse();
        assert_eq!(
            result.unwrap_err(),
            PlatformParseError("google_ads".to_string())
        );
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Platform::YandexDirect).unwrap();
        assert_eq!(json, "\"yandex_direct\"");

        let parsed: Platform = serde_json::from_str("\"vk_ads\"").unwrap();
        assert_eq!(parsed, Platform::VkAds);
    }

    #[test]
    fn only_yandex_polls_reports() {
        assert!(Platform::YandexDirect.uses_async_reports());
        assert!(!Platform::VkAds.uses_async_reports());
        assert!(!Platform::MyTarget.uses_async_reports());
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(Platform::MyTarget.to_string(), "my_target");
        assert_eq!(Platform::MyTarget.display_name(), "myTarget");
    }
}
