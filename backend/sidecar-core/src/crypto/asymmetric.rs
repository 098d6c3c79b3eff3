use crate::crypto::util::hex_to_bytes;
use crate::error::crypto::CryptoError;

use common::ErrorLocation;

use std::panic::Location;

use ed25519_dalek::{
    KEYPAIR_LENGTH, SECRET_KEY_LENGTH, Signer, SigningKey, VerifyingKey,
};

/// Ed25519 detached signature of `message`, as lowercase hex.
///
/// `key` is either a 32-byte seed or a 64-byte `seed || public key` pair,
/// hex-encoded.
#[track_caller]
pub fn sign(message: &str, key: &str) -> Result<String, CryptoError> {
    let signing_key = signing_key(key)?;
    Ok(hex::encode(signing_key.sign(message.as_bytes()).to_bytes()))
}

/// The public half of `key`, as lowercase hex.
#[track_caller]
pub fn verifying_key(key: &str) -> Result<String, CryptoError> {
    let verifying: VerifyingKey = signing_key(key)?.verifying_key();
    Ok(hex::encode(verifying.as_bytes()))
}

#[track_caller]
fn signing_key(key: &str) -> Result<SigningKey, CryptoError> {
    let bytes = hex_to_bytes(key)?;

    match bytes.len() {
        SECRET_KEY_LENGTH => {
            let mut seed = [0u8; SECRET_KEY_LENGTH];
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        KEYPAIR_LENGTH => {
            let mut pair = [0u8; KEYPAIR_LENGTH];
            pair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&pair).map_err(|e| CryptoError::InvalidKey {
                message: format!("batch key pair is inconsistent: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })
        }
        other => Err(CryptoError::InvalidKey {
            message: format!(
                "batch key must be {SECRET_KEY_LENGTH} or {KEYPAIR_LENGTH} bytes, got {other}"
            ),
            location: ErrorLocation::from(Location::caller()),
        }),
    }
}
