//! `fulcrum run`: start the load balancer.
//!
//! Loads and validates configuration, builds the shared state, spawns
//! the health checker (whose first pass runs immediately), and serves
//! the Axum router until Ctrl+C / SIGTERM. On shutdown the checker is
//! signalled through a `watch` channel and awaited before exiting.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::cli::RunArgs;
use crate::config;
use crate::error::FulcrumError;
use crate::logging;
use crate::server::{self, AppState};
use crate::transport::HyperTransport;

pub async fn execute(args: RunArgs) -> Result<(), FulcrumError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let source = config::discover(args.config.as_deref()).await?;
    let (mut config, version) = source.load().await?;

    if let Some(strategy) = args.strategy {
        if strategy != config.strategy {
            tracing::info!(from = %config.strategy, to = %strategy, "strategy overridden from command line");
            config.strategy = strategy;
        }
    }

    let transport = Arc::new(HyperTransport::new());
    let state = Arc::new(AppState::build(
        &config,
        version,
        transport.clone(),
        transport,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let checker_handle = tokio::spawn(Arc::clone(&state.checker).run(shutdown_rx));

    let router = server::build_router(Arc::clone(&state), args.max_body);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        source = source.name(),
        config = %source.location(),
        config_version = state.config_version.short(),
        strategy = %config.strategy,
        backends = config.backends.len(),
        affinity = config.affinity.enabled,
        "fulcrum started"
    );

    // Wrap the shutdown signal to also stop the health checker immediately
    let graceful_shutdown = async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    };

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown)
    .await?;

    // Wait for the health checker to finish (catches panics)
    if let Err(e) = checker_handle.await {
        tracing::error!(error = %e, "health checker task failed");
    }

    tracing::info!(
        total_requests = state.metrics.total_requests(),
        "fulcrum stopped"
    );
    Ok(())
}
