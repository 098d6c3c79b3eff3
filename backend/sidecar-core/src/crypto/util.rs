use crate::error::crypto::CryptoError;

use common::ErrorLocation;

use std::panic::Location;

/// Decode a hex key.
#[track_caller]
pub fn hex_to_bytes(key: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(key).map_err(|e| CryptoError::InvalidKey {
        message: format!("key is not valid hex: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}
