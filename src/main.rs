// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! zwocam — ZWO camera protocol emulator
//!
//! Usage:
//!   zwocam --port 52311
//!   zwocam --port 52311 --seed 42
//!   zwocam --config camera.toml

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zwocam::config::{Cli, ServerConfig};
use zwocam::listener;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match ServerConfig::resolve(&cli) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to resolve configuration");
            std::process::exit(1);
        }
    };

    info!(model = %config.camera.model, port = config.port, "Starting zwocam");

    if let Err(e) = listener::run(config).await {
        error!(error = %e, "Listener exited with error");
        std::process::exit(1);
    }
}
