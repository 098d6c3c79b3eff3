use crate::kms::state::RegistrationStep;

use common::ErrorLocation;

use std::fmt;
use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum KmsError {
    #[error("Not Connected Error: {message} {location}")]
    NotConnected {
        message: String,
        location: ErrorLocation,
    },

    #[error("Connect Timeout Error: Unable to connect to KMS within {timeout_ms}ms {location}")]
    ConnectTimeout {
        timeout_ms: u64,
        location: ErrorLocation,
    },

    #[error("Transport Error: {message} (retryable: {retryable}) {location}")]
    Transport {
        message: String,
        retryable: bool,
        location: ErrorLocation,
    },

    #[error("Send Error: {message} {location}")]
    Send {
        message: String,
        location: ErrorLocation,
    },

    #[error("Request Timeout Error: request {id} got no response within {timeout_ms}ms {location}")]
    RequestTimeout {
        id: String,
        timeout_ms: u64,
        location: ErrorLocation,
    },

    #[error("Duplicate Request Id Error: {id} is already pending {location}")]
    DuplicateRequestId { id: String, location: ErrorLocation },

    #[error("Response Error: KMS returned error {code}: {message} {location}")]
    Response {
        code: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Registration Error: {reason} {location}")]
    Registration {
        reason: RegistrationFailure,
        location: ErrorLocation,
    },

    #[error("Envelope Error: {message} {location}")]
    Envelope {
        message: String,
        location: ErrorLocation,
    },

    #[error("JSON Error: {message} {location}")]
    Json {
        message: String,
        location: ErrorLocation,
    },
}

impl From<serde_json::Error> for KmsError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        KmsError::Json {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

/// Why a registration handshake was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFailure {
    /// The KMS answered a handshake step with an error envelope.
    Rejected {
        step: RegistrationStep,
        code: String,
        message: String,
    },

    /// The register result names a different sidecar.
    UnexpectedSidecar { expected: String, actual: String },

    MalformedResult {
        step: RegistrationStep,
        message: String,
    },

    /// The challenge response status was not `OK`.
    ChallengeStatus { status: String },

    /// The issued keys could not sign the challenge.
    Signing { message: String },
}

impl fmt::Display for RegistrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationFailure::Rejected {
                step,
                code,
                message,
            } => write!(f, "KMS rejected {step} with {code}: {message}"),
            RegistrationFailure::UnexpectedSidecar { expected, actual } => write!(
                f,
                "register result was for sidecar {actual}, expected {expected}"
            ),
            RegistrationFailure::MalformedResult { step, message } => {
                write!(f, "malformed {step} result: {message}")
            }
            RegistrationFailure::ChallengeStatus { status } => {
                write!(f, "challenge status was {status}, expected OK")
            }
            RegistrationFailure::Signing { message } => {
                write!(f, "could not sign challenge: {message}")
            }
        }
    }
}
