//! Serde data structures for the Fulcrum configuration file.
//!
//! Contains [`Config`] (the root), [`BackendConfig`], [`HealthCheckConfig`],
//! [`AffinityConfig`], and [`ForwardConfig`]. All types derive `Serialize`
//! and `Deserialize` with `deny_unknown_fields` for strict parsing. Every
//! section except `backends` is optional and falls back to the defaults
//! below.

use serde::{Deserialize, Serialize};

use crate::balancer::StrategyKind;

const fn default_weight() -> u32 {
    1
}

const fn default_interval_ms() -> u64 {
    10_000
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_expected_status() -> u16 {
    200
}

const fn default_max_age_ms() -> u64 {
    3_600_000
}

const fn default_forward_timeout_ms() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

fn default_health_path() -> String {
    "/healthcheck".to_string()
}

fn default_cookie_name() -> String {
    "lb-affinity".to_string()
}

const fn is_default_weight(v: &u32) -> bool {
    *v == default_weight()
}

const fn is_true(v: &bool) -> bool {
    *v
}

const fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub affinity: AffinityConfig,

    #[serde(default)]
    pub forward: ForwardConfig,

    pub backends: Vec<BackendConfig>,
}

impl Config {
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.backends.iter().map(|b| u64::from(b.weight.max(1))).sum()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub id: String,

    pub host: String,

    pub port: u16,

    #[serde(default = "default_weight", skip_serializing_if = "is_default_weight")]
    pub weight: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_health_path")]
    pub path: String,

    /// The only status code a probe accepts as healthy.
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_probe_timeout_ms(),
            path: default_health_path(),
            expected_status: default_expected_status(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AffinityConfig {
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub http_only: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub secure: bool,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cookie_name: default_cookie_name(),
            max_age_ms: default_max_age_ms(),
            http_only: default_true(),
            secure: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardConfig {
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_forward_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_sections_take_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"backends": [{"id": "a", "host": "localhost", "port": 3000}]}"#,
        )
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::Weighted);
        assert_eq!(config.health_check.interval_ms, 10_000);
        assert_eq!(config.health_check.path, "/healthcheck");
        assert!(config.affinity.enabled);
        assert_eq!(config.affinity.cookie_name, "lb-affinity");
        assert_eq!(config.backends[0].weight, 1);
    }

    #[test]
    fn strategy_names_are_lowercase() {
        let config: Config = serde_json::from_str(
            r#"{"strategy": "roundrobin", "backends": []}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, StrategyKind::RoundRobin);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> =
            serde_json::from_str(r#"{"backends": [], "servers": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn total_weight_sums_backends() {
        let config: Config = serde_json::from_str(
            r#"{"backends": [
                {"id": "a", "host": "h", "port": 1, "weight": 2},
                {"id": "b", "host": "h", "port": 2, "weight": 3}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.total_weight(), 5);
    }
}
