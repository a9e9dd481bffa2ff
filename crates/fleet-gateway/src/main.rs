//! Fleet gateway binary.
//!
//! ```bash
//! # Defaults, DATABASE_URL from the environment
//! fleet-gateway
//!
//! # Explicit configuration file
//! fleet-gateway --config /etc/fleet/gateway.toml
//! ```

use anyhow::Result;
use clap::Parser;
use fleet_gateway::{GatewayConfig, GatewayService};
use fleet_telemetry::{init_telemetry, TelemetryConfig};
use std::path::PathBuf;
use tracing::info;

/// Fleet gateway for homebase experiment controllers
#[derive(Parser, Debug)]
#[command(name = "fleet-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_telemetry(&TelemetryConfig::from_env())?;

    let config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };

    let service = GatewayService::new(config).await?;
    service.start().await?;

    info!("Gateway is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    service.shutdown();
    info!("Shutdown complete.");
    Ok(())
}
