//! Liveness snapshot answered to KMS `healthcheck` requests.

use models::timestamp::to_iso8601;
use models::{HealthCheckResult, HealthStatus};

use std::time::SystemTime;

/// What the sidecar knows about itself at the moment of a health check.
#[derive(Debug, Clone)]
pub struct SidecarStatus {
    pub id: String,
    pub service_name: String,
    pub version: String,
    pub start_time: SystemTime,
    pub sequence: u64,
    pub operational: bool,
}

pub struct HealthCheck;

impl HealthCheck {
    /// Status is `OK` while the KMS session is operational, `DEGRADED` otherwise.
    pub fn ping(status: &SidecarStatus) -> HealthCheckResult {
        let uptime = SystemTime::now()
            .duration_since(status.start_time)
            .unwrap_or_default();

        HealthCheckResult {
            status: if status.operational {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            id: status.id.clone(),
            service_name: status.service_name.clone(),
            version: status.version.clone(),
            start_time: to_iso8601(status.start_time),
            uptime_seconds: uptime.as_secs(),
            sequence: status.sequence,
        }
    }
}
