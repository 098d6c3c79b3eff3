use sidecar::cli::Cli;
use sidecar::error::SidecarAppError;
use sidecar::logger::initialize as LoggerInitialize;

use sidecar_core::config::SidecarConfig;
use sidecar_core::sidecar::Sidecar;
use sidecar_core::store::MemoryStore;

use common::ErrorLocation;

use std::panic::Location;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::signal::ctrl_c;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), SidecarAppError> {
    let cli = Cli::parse();
    let config = SidecarConfig::load(cli.config.as_deref(), &cli.overrides())?;

    // Initialize logger FIRST, everything after this is recorded
    LoggerInitialize(&config.log_dir, config.log_level_filter())?;

    info!(
        "Sidecar {} starting for service {}",
        config.version, config.service_name
    );
    info!("Log directory: {}", config.log_dir.display());

    let store = Arc::new(MemoryStore::new());
    let sidecar = Sidecar::new(config, store);
    let handle = sidecar.start().await?;

    info!(
        "Sidecar {} running, accepting events on {}",
        handle.id(),
        handle.local_addr()
    );

    ctrl_c().await.map_err(|e| SidecarAppError::Signal {
        message: format!("Failed to wait for Ctrl-C: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    info!("Shutdown requested");
    handle.shutdown().await?;
    info!("Sidecar stopped");

    Ok(())
}
