use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum CryptoError {
    #[error("Invalid Key Error: {message} {location}")]
    InvalidKey {
        message: String,
        location: ErrorLocation,
    },
}
