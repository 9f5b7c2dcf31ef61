//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter when enabled
//! - Bind listeners and fail fast on a bad address
//! - Initialize the gateway (initial health probe, background tasks)
//! - Serve until shutdown, then drain and stop the gateway

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::admin::{AdminState, setup_admin_router};
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::HttpServer;
use crate::lifecycle::{Shutdown, signals};
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid {field} '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the gateway until SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::trigger_on_signal(shutdown.clone()));
    run_until(config, shutdown).await
}

/// Run the gateway until `shutdown` is triggered.
pub async fn run_until(config: GatewayConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr = parse_addr("observability.metrics_address", &config.observability.metrics_address)?;
        metrics::init_metrics(addr)?;
    }

    let listener = bind(&config.listener.bind_address).await?;
    let admin_listener = if config.admin.enabled {
        Some(bind(&config.admin.bind_address).await?)
    } else {
        None
    };

    let gateway = Arc::new(Gateway::new(config.clone()));
    gateway.initialize().await;

    let admin_task = admin_listener.map(|listener| {
        let router = setup_admin_router(AdminState::new(gateway.clone(), &config.admin.api_key));
        let stop = shutdown.wait();
        tokio::spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                tracing::info!(address = %addr, "Admin API listening");
            }
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stop)
                .await
            {
                tracing::error!(error = %e, "Admin server failed");
            }
        })
    });

    let served = HttpServer::new(gateway.clone())
        .run(listener, shutdown.wait())
        .await;

    // The proxy listener may have failed on its own; stop everything else.
    shutdown.trigger();
    if let Some(task) = admin_task {
        let _ = task.await;
    }
    gateway.shutdown().await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address).await.map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })
}
