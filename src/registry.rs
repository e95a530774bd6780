//! In-memory backend registry.
//!
//! [`Registry`] owns the ordered set of [`Backend`] descriptors and their
//! health flags. It is built once from config and shared as an
//! `Arc<Registry>` between the dispatcher, the health checker, and the
//! reporting handlers. The only mutation is [`Registry::set_health`].

use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use serde::Serialize;

use crate::config::model::BackendConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub last_checked_at: Option<SystemTime>,
}

impl Backend {
    #[must_use]
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight,
            healthy: true,
            last_checked_at: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&BackendConfig> for Backend {
    fn from(config: &BackendConfig) -> Self {
        Self::new(&config.id, &config.host, config.port, config.weight)
    }
}

/// Who is reporting a health change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSource {
    Probe,
    Demotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl From<bool> for HealthState {
    fn from(healthy: bool) -> Self {
        if healthy {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// A change in a backend's health flag, returned so callers can log it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTransition {
    pub id: String,
    pub from: HealthState,
    pub to: HealthState,
}

#[derive(Debug, Default)]
pub struct Registry {
    backends: RwLock<Vec<Backend>>,
}

impl Registry {
    /// Build a registry from backends in iteration order. Duplicate ids
    /// are expected to have been rejected by config validation.
    #[must_use]
    pub fn new(backends: Vec<Backend>) -> Self {
        Self {
            backends: RwLock::new(backends),
        }
    }

    #[must_use]
    pub fn from_config(backends: &[BackendConfig]) -> Self {
        Self::new(backends.iter().map(Backend::from).collect())
    }

    /// Every backend regardless of health, in registry order.
    #[must_use]
    pub fn list(&self) -> Vec<Backend> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Backends currently marked healthy, in registry order.
    #[must_use]
    pub fn healthy(&self) -> Vec<Backend> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|b| b.healthy)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Backend> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set a backend's health flag. Unknown ids are ignored. Returns the
    /// transition when the flag actually changed.
    ///
    /// Probe reports stamp `last_checked_at` whether or not the flag
    /// changed; demotions by the dispatcher never do.
    pub fn set_health(
        &self,
        id: &str,
        healthy: bool,
        source: HealthSource,
    ) -> Option<HealthTransition> {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let backend = backends.iter_mut().find(|b| b.id == id)?;

        if source == HealthSource::Probe {
            backend.last_checked_at = Some(SystemTime::now());
        }

        if backend.healthy == healthy {
            return None;
        }

        let from = HealthState::from(backend.healthy);
        backend.healthy = healthy;
        Some(HealthTransition {
            id: backend.id.clone(),
            from,
            to: HealthState::from(healthy),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(vec![
            Backend::new("a", "localhost", 3001, 1),
            Backend::new("b", "localhost", 3002, 2),
            Backend::new("c", "localhost", 3003, 3),
        ])
    }

    fn ids(backends: &[Backend]) -> Vec<&str> {
        backends.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn all_backends_start_healthy() {
        let registry = registry();
        assert_eq!(ids(&registry.healthy()), ["a", "b", "c"]);
        assert!(registry.list().iter().all(|b| b.last_checked_at.is_none()));
    }

    #[test]
    fn healthy_preserves_registry_order() {
        let registry = registry();
        registry.set_health("b", false, HealthSource::Probe);
        assert_eq!(ids(&registry.healthy()), ["a", "c"]);
        assert_eq!(ids(&registry.list()), ["a", "b", "c"]);
    }

    #[test]
    fn set_health_reports_transition_once() {
        let registry = registry();
        let first = registry.set_health("a", false, HealthSource::Probe);
        assert_eq!(
            first,
            Some(HealthTransition {
                id: "a".into(),
                from: HealthState::Healthy,
                to: HealthState::Unhealthy,
            })
        );
        assert_eq!(registry.set_health("a", false, HealthSource::Probe), None);
    }

    #[test]
    fn set_health_true_twice_yields_no_second_transition() {
        let registry = registry();
        registry.set_health("a", false, HealthSource::Probe);
        assert!(registry.set_health("a", true, HealthSource::Probe).is_some());
        assert!(registry.set_health("a", true, HealthSource::Probe).is_none());
    }

    #[test]
    fn unknown_id_is_ignored() {
        let registry = registry();
        assert_eq!(registry.set_health("zzz", false, HealthSource::Probe), None);
        assert_eq!(registry.healthy().len(), 3);
    }

    #[test]
    fn probe_stamps_last_checked_but_demotion_does_not() {
        let registry = registry();
        registry.set_health("a", false, HealthSource::Demotion);
        assert!(registry.get("a").unwrap().last_checked_at.is_none());

        registry.set_health("b", true, HealthSource::Probe);
        assert!(registry.get("b").unwrap().last_checked_at.is_some());
    }

    #[test]
    fn from_config_keeps_order_and_fields() {
        let configs = vec![
            BackendConfig {
                id: "x".into(),
                host: "10.0.0.1".into(),
                port: 80,
                weight: 4,
            },
            BackendConfig {
                id: "y".into(),
                host: "10.0.0.2".into(),
                port: 81,
                weight: 1,
            },
        ];
        let registry = Registry::from_config(&configs);
        let list = registry.list();
        assert_eq!(ids(&list), ["x", "y"]);
        assert_eq!(list[0].weight, 4);
        assert_eq!(list[1].address(), "10.0.0.2:81");
    }
}
