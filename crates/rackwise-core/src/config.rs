// Copyright 2025 The Rackwise Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for Rackwise.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the placement subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Placement policy configuration.
    pub placement: PlacementConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

/// Configuration for the placement policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Minimum remaining capacity for a node to be eligible for placement.
    pub min_capacity: f64,

    /// Prefer the requesting client's rack when it ties for the fewest
    /// replicas. A soft locality hint, never a hard constraint.
    pub prefer_client_rack: bool,

    /// Treat unmet erasure-coding rack diversity as a hard failure instead
    /// of a soft flag on the result.
    ///
    /// With the default (`false`), a cluster with fewer racks than shards
    /// still accepts the placement and the result carries
    /// `rack_diversity_met == false`.
    pub strict_ec_diversity: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self { min_capacity: 0.0, prefer_client_rack: true, strict_ec_diversity: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlacementConfig::default();
        assert!(config.min_capacity.abs() < f64::EPSILON);
        assert!(config.prefer_client_rack);
        assert!(!config.strict_ec_diversity);
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(
            r#"
            [placement]
            min_capacity = 1.5
            strict_ec_diversity = true
            "#,
        )
        .unwrap();

        assert!((config.placement.min_capacity - 1.5).abs() < f64::EPSILON);
        assert!(config.placement.strict_ec_diversity);
        // Unspecified fields fall back to defaults.
        assert!(config.placement.prefer_client_rack);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(Config::parse("not valid [ toml").is_err());
    }
}
