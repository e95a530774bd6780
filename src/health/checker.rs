//! Periodic backend probing.
//!
//! [`HealthChecker::run`] ticks at the configured interval (first tick
//! immediately) and runs [`HealthChecker::check_all`], which probes every
//! registered backend concurrently. Each probe is bounded by the probe
//! timeout, and each outcome is written to the registry as soon as it
//! arrives. Only health transitions are logged at `info`/`warn`.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::config::model::HealthCheckConfig;
use crate::error::TransportError;
use crate::metrics::unix_millis;
use crate::registry::{Backend, HealthSource, HealthState, Registry};
use crate::transport::Prober;

/// Result of probing one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub last_check: u64,
}

impl ProbeReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy.to_string()
    }
}

pub struct HealthChecker {
    registry: Arc<Registry>,
    prober: Arc<dyn Prober>,
    interval: Duration,
    timeout: Duration,
    path: String,
    expected_status: StatusCode,
}

impl HealthChecker {
    #[must_use]
    pub fn new(registry: Arc<Registry>, prober: Arc<dyn Prober>, config: &HealthCheckConfig) -> Self {
        Self {
            registry,
            prober,
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            path: config.path.clone(),
            expected_status: StatusCode::from_u16(config.expected_status).unwrap_or(StatusCode::OK),
        }
    }

    /// Probe every backend once and apply the outcomes. Reports come back
    /// in registry order.
    pub async fn check_all(&self) -> Vec<ProbeReport> {
        let backends = self.registry.list();
        let mut probes = JoinSet::new();

        for (index, backend) in backends.into_iter().enumerate() {
            let prober = Arc::clone(&self.prober);
            let path = self.path.clone();
            let timeout = self.timeout;
            probes.spawn(async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    timeout,
                    prober.probe(&backend.host, backend.port, &path, timeout),
                )
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout(timeout)));
                (index, backend, outcome, started.elapsed())
            });
        }

        let mut reports = Vec::with_capacity(probes.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, backend, outcome, elapsed)) => {
                    reports.push((index, self.apply(&backend, outcome, elapsed)));
                }
                Err(e) => tracing::error!(error = %e, "health probe task failed"),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        let reports: Vec<ProbeReport> = reports.into_iter().map(|(_, r)| r).collect();

        tracing::debug!(
            healthy = reports.iter().filter(|r| r.is_healthy()).count(),
            total = reports.len(),
            "health check pass complete"
        );
        reports
    }

    #[allow(clippy::cast_possible_truncation)]
    fn apply(
        &self,
        backend: &Backend,
        outcome: Result<StatusCode, TransportError>,
        elapsed: Duration,
    ) -> ProbeReport {
        let (healthy, status_code, error) = match outcome {
            Ok(status) if status == self.expected_status => (true, Some(status.as_u16()), None),
            Ok(status) => (
                false,
                Some(status.as_u16()),
                Some(format!("unexpected status {}", status.as_u16())),
            ),
            Err(e) => (false, None, Some(e.to_string())),
        };

        if let Some(t) = self
            .registry
            .set_health(&backend.id, healthy, HealthSource::Probe)
        {
            if healthy {
                tracing::info!(backend = %t.id, from = %t.from, to = %t.to, "backend health changed");
            } else {
                tracing::warn!(
                    backend = %t.id,
                    from = %t.from,
                    to = %t.to,
                    reason = error.as_deref().unwrap_or_default(),
                    "backend health changed"
                );
            }
        }

        ProbeReport {
            id: backend.id.clone(),
            status: HealthState::from(healthy).to_string(),
            status_code,
            error,
            latency_ms: elapsed.as_millis() as u64,
            last_check: unix_millis(SystemTime::now()),
        }
    }

    /// Probe on every tick until `shutdown` flips or its sender is dropped.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            path = %self.path,
            "health checker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!("health checker shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::TransportErrorKind;

    /// Answers per port; unknown ports are refused.
    #[derive(Default)]
    struct ScriptedProber {
        answers: Mutex<HashMap<u16, Result<StatusCode, TransportErrorKind>>>,
        hang: Option<u16>,
    }

    impl ScriptedProber {
        fn set(&self, port: u16, answer: Result<StatusCode, TransportErrorKind>) {
            self.answers.lock().unwrap().insert(port, answer);
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(
            &self,
            _host: &str,
            port: u16,
            _path: &str,
            _timeout: Duration,
        ) -> Result<StatusCode, TransportError> {
            if self.hang == Some(port) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let answer = self
                .answers
                .lock()
                .unwrap()
                .get(&port)
                .copied()
                .unwrap_or(Err(TransportErrorKind::Refused));
            answer.map_err(|kind| TransportError::new(kind, "scripted"))
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(vec![
            Backend::new("a", "localhost", 3001, 1),
            Backend::new("b", "localhost", 3002, 1),
        ]))
    }

    fn checker(registry: Arc<Registry>, prober: Arc<ScriptedProber>) -> HealthChecker {
        HealthChecker::new(
            registry,
            prober,
            &HealthCheckConfig {
                interval_ms: 10_000,
                timeout_ms: 50,
                ..HealthCheckConfig::default()
            },
        )
    }

    fn healthy_ids(registry: &Registry) -> Vec<String> {
        registry.healthy().into_iter().map(|b| b.id).collect()
    }

    #[tokio::test]
    async fn only_expected_status_is_healthy() {
        let registry = registry();
        let prober = Arc::new(ScriptedProber::default());
        prober.set(3001, Ok(StatusCode::OK));
        prober.set(3002, Ok(StatusCode::NO_CONTENT));

        let reports = checker(registry.clone(), prober).check_all().await;

        assert_eq!(healthy_ids(&registry), ["a"]);
        assert_eq!(reports[0].id, "a");
        assert!(reports[0].is_healthy());
        assert_eq!(reports[1].status_code, Some(204));
        assert!(!reports[1].is_healthy());
    }

    #[tokio::test]
    async fn successful_probe_restores_backend() {
        let registry = registry();
        registry.set_health("b", false, HealthSource::Demotion);
        let prober = Arc::new(ScriptedProber::default());
        prober.set(3001, Ok(StatusCode::OK));
        prober.set(3002, Ok(StatusCode::OK));

        checker(registry.clone(), prober).check_all().await;

        assert_eq!(healthy_ids(&registry), ["a", "b"]);
        assert!(registry.get("b").unwrap().last_checked_at.is_some());
    }

    #[tokio::test]
    async fn connection_errors_mark_unhealthy() {
        let registry = registry();
        let prober = Arc::new(ScriptedProber::default());
        prober.set(3001, Err(TransportErrorKind::Reset));

        let reports = checker(registry.clone(), prober).check_all().await;

        assert!(healthy_ids(&registry).is_empty());
        assert!(reports.iter().all(|r| r.error.is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_is_cut_off_at_timeout() {
        let registry = registry();
        let prober = Arc::new(ScriptedProber {
            hang: Some(3002),
            ..ScriptedProber::default()
        });
        prober.set(3001, Ok(StatusCode::OK));

        let started = tokio::time::Instant::now();
        let reports = checker(registry.clone(), prober).check_all().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(healthy_ids(&registry), ["a"]);
        assert!(reports[1].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_probes_immediately_and_stops_on_shutdown() {
        let registry = registry();
        let prober = Arc::new(ScriptedProber::default());
        prober.set(3001, Ok(StatusCode::OK));
        prober.set(3002, Ok(StatusCode::SERVICE_UNAVAILABLE));

        let checker = Arc::new(checker(registry.clone(), prober.clone()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(checker.run(rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(healthy_ids(&registry), ["a"]);

        prober.set(3002, Ok(StatusCode::OK));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(healthy_ids(&registry), ["a", "b"]);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
