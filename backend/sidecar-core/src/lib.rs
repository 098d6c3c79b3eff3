pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod framing;
pub mod health;
pub mod kms;
pub mod listener;
pub mod sidecar;
pub mod store;

#[cfg(test)]
mod tests;

pub const DEFAULT_KMS_HOSTNAME: &str = "localhost";
pub const DEFAULT_KMS_PORT: u16 = 8080;
pub const DEFAULT_KMS_URL: &str =
    const_format::concatcp!("ws://", DEFAULT_KMS_HOSTNAME, ":", DEFAULT_KMS_PORT, "/sidecar");
pub const DEFAULT_LISTENER_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_LISTENER_PORT: u16 = 5678;
