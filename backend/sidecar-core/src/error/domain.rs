use crate::error::crypto::CryptoError;
use crate::error::store::StoreError;

use common::ErrorLocation;
use models::ModelError;

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum DomainError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Serialization Error: {message} {location}")]
    Serialization {
        message: String,
        location: ErrorLocation,
    },

    #[error("Empty Batch Error: {message} {location}")]
    EmptyBatch {
        message: String,
        location: ErrorLocation,
    },
}

impl From<serde_json::Error> for DomainError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        DomainError::Serialization {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
