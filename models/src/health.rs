use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "DEGRADED")]
    Degraded,
}

/// Liveness snapshot returned to the KMS for a `healthcheck` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub id: String,
    pub service_name: String,
    pub version: String,
    pub start_time: String,
    pub uptime_seconds: u64,
    pub sequence: u64,
}
