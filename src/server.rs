//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding the registry,
//! metrics, dispatcher, and health checker), [`AppState::build`] which
//! wires them from a validated config, [`build_router`] for constructing
//! the Axum router with middleware layers, and [`shutdown_signal`] for
//! SIGTERM / Ctrl+C handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::affinity::Affinity;
use crate::balancer::{Balancer, StrategyKind};
use crate::config::model::Config;
use crate::config::ConfigVersion;
use crate::health::{health_handler, HealthChecker};
use crate::metrics::{metrics_handler, Metrics};
use crate::proxy;
use crate::proxy::dispatch::Dispatcher;
use crate::registry::Registry;
use crate::transport::{Prober, Transport};

pub struct AppState {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
    pub dispatcher: Dispatcher,
    pub checker: Arc<HealthChecker>,
    pub strategy: StrategyKind,
    pub affinity_enabled: bool,
    pub config_version: ConfigVersion,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every component from a validated config. The registry starts
    /// with all backends healthy; the checker's first pass corrects that.
    #[must_use]
    pub fn build(
        config: &Config,
        version: ConfigVersion,
        transport: Arc<dyn Transport>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let registry = Arc::new(Registry::from_config(&config.backends));
        let metrics = Arc::new(Metrics::from_registry(&registry));
        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&registry),
            prober,
            &config.health_check,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Balancer::new(config.strategy),
            Affinity::new(config.affinity.clone()),
            Arc::clone(&metrics),
            transport,
            Duration::from_millis(config.forward.timeout_ms),
        );

        Self {
            registry,
            metrics,
            dispatcher,
            checker,
            strategy: config.strategy,
            affinity_enabled: config.affinity.enabled,
            config_version: version,
            start_time: Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<AppState>, max_body: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy::forward_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
