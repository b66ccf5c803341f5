//! Tunables shared by every component.
//!
//! This struct holds the parsed, validated values; `proxy-service` owns the
//! `clap`/file-precedence layer that produces one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for SignatureCacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 10_000,
            cleanup_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalancerStrategy {
    RoundRobin,
    FillFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerSettings {
    pub strategy: LoadBalancerStrategy,
    pub default_rate_limit_secs: i64,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            strategy: LoadBalancerStrategy::RoundRobin,
            default_rate_limit_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_auth_retries: u32,
    pub auto_refresh_token: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_auth_retries: 1,
            auto_refresh_token: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub layer1_threshold: f64,
    pub layer2_threshold: f64,
    pub layer3_threshold: f64,
    pub keep_last_tool_rounds: usize,
    pub protected_last_n: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            layer1_threshold: 60.0,
            layer2_threshold: 75.0,
            layer3_threshold: 90.0,
            keep_last_tool_rounds: 5,
            protected_last_n: 4,
        }
    }
}

/// The full set of tunables the service accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub default_model: String,
    /// Custom client-model → Upstream-model mapping table (exact and
    /// wildcard entries).
    #[serde(default)]
    pub model_mappings: std::collections::HashMap<String, String>,
    pub signature_cache: SignatureCacheSettings,
    pub load_balancer: LoadBalancerSettings,
    pub retry: RetrySettings,
    pub compression: CompressionSettings,
    #[serde(default)]
    pub account_store_path: Option<String>,
    #[serde(default)]
    pub usage_database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            default_model: "gemini-2.5-pro".to_string(),
            model_mappings: Default::default(),
            signature_cache: SignatureCacheSettings::default(),
            load_balancer: LoadBalancerSettings::default(),
            retry: RetrySettings::default(),
            compression: CompressionSettings::default(),
            account_store_path: None,
            usage_database_url: None,
        }
    }
}

impl Config {
    /// Merge a partially-specified TOML file over the default, then let
    /// `overrides` (typically CLI flags) win over both — precedence is
    /// CLI flag > config file > hardcoded default.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Toml)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.signature_cache.ttl_secs, 3600);
        assert_eq!(config.signature_cache.max_entries, 10_000);
        assert_eq!(config.load_balancer.default_rate_limit_secs, 60);
        assert_eq!(config.retry.max_auth_retries, 1);
        assert!(config.retry.auto_refresh_token);
        assert_eq!(config.compression.layer1_threshold, 60.0);
        assert_eq!(config.compression.keep_last_tool_rounds, 5);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let toml_text = r#"
            host = "0.0.0.0"
            port = 9000
            default_model = "gemini-2.5-pro"

            [signature_cache]
            ttl_secs = 7200
            max_entries = 5000
            cleanup_interval_secs = 120

            [load_balancer]
            strategy = "fillFirst"
            default_rate_limit_secs = 30

            [retry]
            max_auth_retries = 2
            auto_refresh_token = false

            [compression]
            layer1_threshold = 50.0
            layer2_threshold = 70.0
            layer3_threshold = 85.0
            keep_last_tool_rounds = 3
            protected_last_n = 2
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.load_balancer.strategy, LoadBalancerStrategy::FillFirst);
        assert_eq!(config.retry.max_auth_retries, 2);
    }
}
