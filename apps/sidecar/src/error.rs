use sidecar_core::error::config::ConfigError;
use sidecar_core::error::sidecar::SidecarError;

use common::ErrorLocation;

use thiserror::Error;

/// Errors that end the sidecar process.
#[derive(Debug, Error)]
pub enum SidecarAppError {
    /// Logging could not be set up
    #[error("Logger Error: {message} {location}")]
    Logger {
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Startup or shutdown of the sidecar itself failed
    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    /// Waiting for the shutdown signal failed
    #[error("Signal Error: {message} {location}")]
    Signal {
        message: String,
        location: ErrorLocation,
    },
}
