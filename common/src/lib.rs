//! Shared plumbing for the sidecar workspace.
//!
//! This crate holds the small pieces every other crate leans on:
//!
//! - [`ErrorLocation`]: call-site capture attached to every error variant
//! - [`RedactedKey`]: key material that never shows up in logs or debug output
//!
//! ## Architecture
//!
//! - **common** (this crate): error plumbing and secret handling
//! - **models**: pure data passed between layers
//! - **sidecar-core**: framing, KMS session, domain services
//! - **sidecar**: application wiring everything together

pub mod error;
pub mod redacted_key;

pub use error::error_location::ErrorLocation;
pub use error::redact_error::RedactError;
pub use redacted_key::RedactedKey;

#[cfg(test)]
mod tests;
