use crate::DEFAULT_KMS_URL;
use crate::config::KmsConfig;

use std::time::Duration;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5_000);

/// Runtime knobs for a [`KmsSession`](crate::kms::KmsSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsSettings {
    pub url: String,
    pub ping_interval: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub auto_reconnect: bool,
}

impl Default for KmsSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_KMS_URL.to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            auto_reconnect: true,
        }
    }
}

impl From<&KmsConfig> for KmsSettings {
    fn from(config: &KmsConfig) -> Self {
        Self {
            url: config.url.clone(),
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            auto_reconnect: config.auto_reconnect,
        }
    }
}
