//! Domain models for the sidecar.
//!
//! Pure data structures: events as they are signed and stored, batches as they
//! are submitted to the KMS, the health-check snapshot and the key pair issued
//! at registration. Models have no I/O; `sidecar-core` operates on them.

pub mod batch;
pub mod error;
pub mod event;
pub mod health;
pub mod keys;
pub mod timestamp;

pub use batch::{Batch, BatchBuilder, BatchRow};
pub use error::model_error::ModelError;
pub use event::{Event, EventBuilder, EventId, SignableEvent};
pub use health::{HealthCheckResult, HealthStatus};
pub use keys::KmsKeys;

#[cfg(test)]
mod tests;
