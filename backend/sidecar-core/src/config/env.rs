use crate::error::config::ConfigError;

use common::ErrorLocation;

use std::fmt::Display;
use std::panic::Location;
use std::str::FromStr;

use const_format::concatcp;
use log::{debug, info};

pub const ENV_PREFIX: &str = "SIDE_";

pub const PORT: &str = concatcp!(ENV_PREFIX, "PORT");
pub const SERVICE: &str = concatcp!(ENV_PREFIX, "SERVICE");
pub const BATCH_SIZE: &str = concatcp!(ENV_PREFIX, "BATCH_SIZE");
pub const KMS_URL: &str = concatcp!(ENV_PREFIX, "KMS_URL");
pub const KMS_PING_INTERVAL: &str = concatcp!(ENV_PREFIX, "KMS_PING_INTERVAL");
pub const KMS_REQUEST_TIMEOUT: &str = concatcp!(ENV_PREFIX, "KMS_REQUEST_TIMEOUT");
pub const KMS_CONNECT_TIMEOUT: &str = concatcp!(ENV_PREFIX, "KMS_CONNECT_TIMEOUT");
pub const KMS_RECONNECT_INTERVAL: &str = concatcp!(ENV_PREFIX, "KMS_RECONNECT_INTERVAL");
pub const LOG_LEVEL: &str = concatcp!(ENV_PREFIX, "LOG_LEVEL");

/// Load `.env` from the working directory if there is one.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => info!("Loaded .env from: {:?}", path),
        Err(e) => debug!("No .env loaded: {}", e),
    }
}

/// A set, non-blank variable.
pub fn string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A set, non-blank variable parsed as `T`.
#[track_caller]
pub fn parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = string(name) else {
        return Ok(None);
    };

    raw.parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::EnvironmentError {
            location: ErrorLocation::from(Location::caller()),
            variable: name.to_string(),
            reason: format!("cannot parse {raw:?}: {e}"),
        })
}
