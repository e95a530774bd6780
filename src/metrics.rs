//! Request counters and the `GET /metrics` report.
//!
//! [`Metrics`] keeps a process-wide request total plus per-backend
//! counters, all `AtomicU64`, so recording never takes a lock and a
//! [`Metrics::snapshot`] never blocks an increment. The per-backend map is
//! fixed at construction from the configured backend ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::balancer::StrategyKind;
use crate::registry::Registry;
use crate::server::AppState;

/// Milliseconds since the Unix epoch, or 0 for times before it.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[derive(Debug, Default)]
struct BackendCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    /// Unix millis of the last selection; 0 means never used.
    last_used_at: AtomicU64,
}

#[derive(Debug)]
pub struct Metrics {
    total_requests: AtomicU64,
    per_backend: HashMap<String, BackendCounters>,
    started_at: Instant,
}

impl Metrics {
    #[must_use]
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            total_requests: AtomicU64::new(0),
            per_backend: ids
                .into_iter()
                .map(|id| (id.into(), BackendCounters::default()))
                .collect(),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn from_registry(registry: &Registry) -> Self {
        Self::new(registry.list().into_iter().map(|b| b.id))
    }

    /// Count a request routed to `id` and stamp its last-used time.
    pub fn record_request(&self, id: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(counters) = self.per_backend.get(id) {
            counters.requests.fetch_add(1, Ordering::Relaxed);
            counters
                .last_used_at
                .store(unix_millis(SystemTime::now()), Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, id: &str) {
        if let Some(counters) = self.per_backend.get(id) {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn requests(&self, id: &str) -> u64 {
        self.per_backend
            .get(id)
            .map_or(0, |c| c.requests.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn errors(&self, id: &str) -> u64 {
        self.per_backend
            .get(id)
            .map_or(0, |c| c.errors.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Combine the counters with the registry's current health view.
    #[must_use]
    pub fn snapshot(&self, registry: &Registry, strategy: StrategyKind) -> MetricsSnapshot {
        let backends = registry.list();
        let per_backend: Vec<BackendStats> = backends
            .into_iter()
            .map(|b| {
                let (requests, errors, last_used_at) =
                    self.per_backend.get(&b.id).map_or((0, 0, None), |c| {
                        let last = c.last_used_at.load(Ordering::Relaxed);
                        (
                            c.requests.load(Ordering::Relaxed),
                            c.errors.load(Ordering::Relaxed),
                            (last > 0).then_some(last),
                        )
                    });
                BackendStats {
                    id: b.id,
                    host: b.host,
                    port: b.port,
                    weight: b.weight,
                    healthy: b.healthy,
                    requests,
                    errors,
                    last_used_at,
                }
            })
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests(),
            healthy_count: per_backend.iter().filter(|b| b.healthy).count(),
            total_count: per_backend.len(),
            per_backend,
            strategy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub requests: u64,
    pub errors: u64,
    pub last_used_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub per_backend: Vec<BackendStats>,
    pub strategy: StrategyKind,
    pub healthy_count: usize,
    pub total_count: usize,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.per_backend.iter().map(|b| b.errors).sum()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsReport {
    pub timestamp: u64,
    pub uptime: Uptime,
    pub load_balancer: LoadBalancerSummary,
    pub traffic: TrafficSummary,
    pub servers: Vec<ServerReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Uptime {
    pub milliseconds: u64,
    pub seconds: u64,
    pub formatted: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadBalancerSummary {
    pub strategy: StrategyKind,
    pub session_affinity: bool,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub unhealthy_servers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrafficSummary {
    pub total_requests: u64,
    pub requests_per_second: f64,
    /// Percentage of requests that ended in an error, rounded.
    pub error_rate: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerReport {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub requests: u64,
    pub errors: u64,
    pub last_used_at: Option<u64>,
    pub load_percentage: u64,
}

fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return 0;
    }
    (part * 100 + whole / 2) / whole
}

#[must_use]
pub fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours}h {minutes}m {secs}s")
}

impl MetricsReport {
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn build(snapshot: MetricsSnapshot, uptime: std::time::Duration, affinity: bool) -> Self {
        let seconds = uptime.as_secs();
        let total = snapshot.total_requests;
        let requests_per_second = if seconds == 0 {
            0.0
        } else {
            (total as f64 / seconds as f64 * 100.0).round() / 100.0
        };
        let error_rate = percent(snapshot.total_errors(), total);

        Self {
            timestamp: unix_millis(SystemTime::now()),
            uptime: Uptime {
                milliseconds: uptime.as_millis() as u64,
                seconds,
                formatted: format_uptime(seconds),
            },
            load_balancer: LoadBalancerSummary {
                strategy: snapshot.strategy,
                session_affinity: affinity,
                total_servers: snapshot.total_count,
                healthy_servers: snapshot.healthy_count,
                unhealthy_servers: snapshot.total_count - snapshot.healthy_count,
            },
            traffic: TrafficSummary {
                total_requests: total,
                requests_per_second,
                error_rate,
            },
            servers: snapshot
                .per_backend
                .into_iter()
                .map(|b| ServerReport {
                    load_percentage: percent(b.requests, total),
                    id: b.id,
                    host: b.host,
                    port: b.port,
                    weight: b.weight,
                    healthy: b.healthy,
                    requests: b.requests,
                    errors: b.errors,
                    last_used_at: b.last_used_at,
                })
                .collect(),
        }
    }
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsReport> {
    let snapshot = state.metrics.snapshot(&state.registry, state.strategy);
    Json(MetricsReport::build(
        snapshot,
        state.metrics.uptime(),
        state.affinity_enabled,
    ))
}
