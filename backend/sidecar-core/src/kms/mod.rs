//! KMS control channel.
//!
//! One WebSocket connection carries JSON-RPC traffic in both directions:
//!
//! - sidecar to KMS: `register`, `challenge`, `batch`, replies and `inquiry-response`
//! - KMS to sidecar: `healthcheck`, `inquiry`
//!
//! [`KmsSession`] owns the transport. It correlates responses through
//! [`PendingRequests`], keeps the connection warm with [`KeepAlive`] and
//! publishes KMS-initiated requests as [`KmsEvent`]s.

pub mod envelope;
pub mod events;
pub mod keep_alive;
pub mod pending;
pub mod retry;
pub mod session;
pub mod settings;
pub mod state;

pub use envelope::RpcError;
pub use events::{HealthCheckRequest, InquiryRequest, KmsEvent, KmsEvents};
pub use keep_alive::KeepAlive;
pub use pending::{PendingRequest, PendingRequests};
pub use retry::RetryPolicy;
pub use session::KmsSession;
pub use settings::KmsSettings;
pub use state::{RegistrationStep, SessionState};
