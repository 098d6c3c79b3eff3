pub mod config;
pub mod crypto;
pub mod domain;
pub mod framing;
pub mod kms;
pub mod listener;
pub mod sidecar;
pub mod store;

pub use kms::{KmsError, RegistrationFailure};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Crypto(#[from] crypto::CryptoError),

    #[error(transparent)]
    Domain(#[from] domain::DomainError),

    #[error(transparent)]
    Framing(#[from] framing::FramingError),

    #[error(transparent)]
    Kms(#[from] kms::KmsError),

    #[error(transparent)]
    Listener(#[from] listener::ListenerError),

    #[error(transparent)]
    Sidecar(#[from] sidecar::SidecarError),

    #[error(transparent)]
    Store(#[from] store::StoreError),
}
