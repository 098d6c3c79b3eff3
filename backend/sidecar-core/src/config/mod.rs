//! Sidecar configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults
//! 2. the TOML file, if one is given and exists
//! 3. `SIDE_*` environment variables (a `.env` file is loaded first)
//! 4. command-line overrides
//!
//! The merged result is validated before it is returned.

mod env;

use crate::error::config::ConfigError;
use crate::framing::DEFAULT_MAX_FRAME_SIZE;
use crate::{DEFAULT_KMS_URL, DEFAULT_LISTENER_ADDRESS, DEFAULT_LISTENER_PORT};

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{LevelFilter, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BATCH_SIZE: usize = 64;
const LOG_DIR_NAME: &str = "sidecar";

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            address: default_address(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsConfig {
    #[serde(default = "default_kms_url")]
    pub url: String,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            url: default_kms_url(),
            ping_interval_ms: default_ping_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            auto_reconnect: default_auto_reconnect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarConfig {
    #[serde(default)]
    pub service_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub kms: KmsConfig,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            version: default_version(),
            batch_size: default_batch_size(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            listener: ListenerConfig::default(),
            kms: KmsConfig::default(),
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub service_name: Option<String>,
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_port() -> u16 {
    DEFAULT_LISTENER_PORT
}
fn default_address() -> String {
    DEFAULT_LISTENER_ADDRESS.to_string()
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_kms_url() -> String {
    DEFAULT_KMS_URL.to_string()
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_reconnect_interval_ms() -> u64 {
    5_000
}
fn default_auto_reconnect() -> bool {
    true
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(LOG_DIR_NAME)
        .join("logs")
}

// ============================================
// IMPLEMENTATION
// ============================================

impl SidecarConfig {
    /// Build the effective configuration.
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - the file exists but cannot be read or parsed
    /// - an environment variable holds an unparsable value
    /// - the merged configuration fails [`validate`](Self::validate)
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        env::load_dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("No config file given, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Read a TOML config file, falling back to defaults if it does not exist.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            warn!("Failed to read config file {}: {}", path.display(), e);
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        let config: SidecarConfig = toml::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config file {}: {}", path.display(), e);
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Apply `SIDE_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = env::parse(env::PORT)? {
            self.listener.port = port;
        }
        if let Some(service) = env::string(env::SERVICE) {
            self.service_name = service;
        }
        if let Some(batch_size) = env::parse(env::BATCH_SIZE)? {
            self.batch_size = batch_size;
        }
        if let Some(url) = env::string(env::KMS_URL) {
            self.kms.url = url;
        }
        if let Some(ms) = env::parse(env::KMS_PING_INTERVAL)? {
            self.kms.ping_interval_ms = ms;
        }
        if let Some(ms) = env::parse(env::KMS_REQUEST_TIMEOUT)? {
            self.kms.request_timeout_ms = ms;
        }
        if let Some(ms) = env::parse(env::KMS_CONNECT_TIMEOUT)? {
            self.kms.connect_timeout_ms = ms;
        }
        if let Some(ms) = env::parse(env::KMS_RECONNECT_INTERVAL)? {
            self.kms.reconnect_interval_ms = ms;
        }
        if let Some(level) = env::string(env::LOG_LEVEL) {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.listener.port = port;
        }
        if let Some(service) = &overrides.service_name {
            self.service_name = service.clone();
        }
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(validation_error(
                "service_name is required (set it in the config file, SIDE_SERVICE or --service)",
            ));
        }

        if self.batch_size == 0 {
            return Err(validation_error("batch_size must be greater than 0"));
        }

        if LevelFilter::from_str(&self.log_level).is_err() {
            return Err(validation_error(format!(
                "Invalid log_level: {}",
                self.log_level
            )));
        }

        if self.listener.address.trim().is_empty() {
            return Err(validation_error("listener.address cannot be empty"));
        }

        if self.listener.max_frame_size == 0 {
            return Err(validation_error(
                "listener.max_frame_size must be greater than 0",
            ));
        }

        let url = Url::parse(&self.kms.url).map_err(|e| {
            validation_error(format!("Invalid kms.url {}: {e}", self.kms.url))
        })?;
        if url.scheme() != "ws" {
            return Err(validation_error(format!(
                "Invalid kms.url scheme: {} (expected ws)",
                url.scheme()
            )));
        }

        for (name, value) in [
            ("kms.ping_interval_ms", self.kms.ping_interval_ms),
            ("kms.request_timeout_ms", self.kms.request_timeout_ms),
            ("kms.connect_timeout_ms", self.kms.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(validation_error(format!("{name} must be greater than 0")));
            }
        }

        Ok(())
    }

    /// The configured log level. Falls back to `Info` for unparsable values.
    pub fn log_level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }
}

#[track_caller]
fn validation_error(reason: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        location: ErrorLocation::from(Location::caller()),
        reason: reason.into(),
    }
}
