use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum FramingError {
    #[error("Frame Too Large Error: frame of {length} bytes exceeds limit of {max} bytes {location}")]
    FrameTooLarge {
        length: usize,
        max: usize,
        location: ErrorLocation,
    },

    #[error("Payload Too Large Error: {message} {location}")]
    PayloadTooLarge {
        message: String,
        location: ErrorLocation,
    },
}
