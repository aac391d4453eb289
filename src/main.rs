//! pg-ha-coordinator entry point.
//!
//! Starts the coordinator loop and the Axum HTTP server with REST and
//! WebSocket endpoints.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pg_ha_coordinator::adapter;
use pg_ha_coordinator::api;
use pg_ha_coordinator::app_state::AppState;
use pg_ha_coordinator::config::{CoordinatorConfig, LogFormat};
use pg_ha_coordinator::dcs::JsonFileStore;
use pg_ha_coordinator::domain::EventBus;
use pg_ha_coordinator::service::HaCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = CoordinatorConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    tracing::info!(
        addr = %config.listen_addr,
        member = %config.member_name,
        engine = ?config.engine,
        "starting pg-ha-coordinator"
    );

    // Build adapter and coordination store
    let adapter = adapter::build(&config)?;
    let store = Arc::new(JsonFileStore::new(
        config.dcs_path.clone(),
        config.dcs_status_dir.clone(),
    ));

    // Build service layer
    let event_bus = EventBus::new(config.event_bus_capacity);
    let coordinator = Arc::new(HaCoordinator::new(
        store,
        adapter,
        event_bus,
        config.probe_timeout,
    ));

    // Start the control loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control_loop = {
        let coordinator = Arc::clone(&coordinator);
        let interval = config.tick_interval;
        tokio::spawn(async move { coordinator.run(interval, shutdown_rx).await })
    };

    // Build router
    let app = api::app(AppState::new(coordinator));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the control loop; an in-flight tick is cancelled
    let _ = shutdown_tx.send(true);
    control_loop.await?;

    tracing::info!("pg-ha-coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
