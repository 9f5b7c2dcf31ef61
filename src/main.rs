//! API gateway binary.
//!
//! ```text
//!     Client Request     ┌──────────────────────────────────────────────────────┐
//!     ───────────────────┼─▶ http server ─▶ rate limiter ─▶ circuit breaker     │
//!                        │                                       │              │
//!                        │                                       ▼              │
//!                        │                               load balancer          │
//!                        │                            (healthy backends only)   │
//!                        │                                       │              │
//!     Client Response    │                                       ▼              │
//!     ◀──────────────────┼── header rewrite ◀── transport ◀── backend ◀─────────┼── Backend
//!                        │                                                      │
//!                        │   health monitor (periodic probes)                   │
//!                        │   admin API (bearer token)  ·  Prometheus exporter   │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use api_gateway::config::{GatewayConfig, loader};
use api_gateway::lifecycle::startup;
use api_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Reverse-proxy API gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load and validate the configuration, then exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => loader::load_config(path)?,
        None => GatewayConfig::default(),
    };

    if args.validate {
        println!("Configuration is valid");
        return Ok(());
    }

    logging::init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        strategy = ?config.load_balancing.strategy,
        "Configuration loaded"
    );

    startup::run(config).await?;
    Ok(())
}
