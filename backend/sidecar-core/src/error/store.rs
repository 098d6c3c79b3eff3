use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("Duplicate Error: {message} {location}")]
    Duplicate {
        message: String,
        location: ErrorLocation,
    },

    #[error("Not Found Error: {message} {location}")]
    NotFound {
        message: String,
        location: ErrorLocation,
    },

    #[error("Poisoned Error: {message} {location}")]
    Poisoned {
        message: String,
        location: ErrorLocation,
    },
}
