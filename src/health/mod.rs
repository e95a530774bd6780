//! Backend health: the background [`checker`] and the `GET /health`
//! endpoint.
//!
//! The endpoint runs a probe pass on demand (the same pass the
//! background loop runs, so it updates the registry too) and returns a
//! [`HealthResponse`] summary alongside the build version and uptime.

pub mod checker;

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::metrics::unix_millis;
use crate::server::AppState;
pub use checker::{HealthChecker, ProbeReport};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub timestamp: u64,
    pub version: String,
    pub git_hash: String,
    pub uptime_seconds: u64,
    pub config_version: String,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub unhealthy_servers: usize,
    pub servers: Vec<ProbeReport>,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let servers = state.checker.check_all().await;
    let healthy = servers.iter().filter(|r| r.is_healthy()).count();

    Json(HealthResponse {
        timestamp: unix_millis(SystemTime::now()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("FULCRUM_GIT_SHORT").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config_version: state.config_version.short().to_string(),
        total_servers: servers.len(),
        healthy_servers: healthy,
        unhealthy_servers: servers.len() - healthy,
        servers,
    })
}
