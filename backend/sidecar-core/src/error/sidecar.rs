use crate::error::kms::KmsError;
use crate::error::listener::ListenerError;

use common::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SidecarError {
    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Shutdown Error: {message} {location}")]
    Shutdown {
        message: String,
        location: ErrorLocation,
    },
}
