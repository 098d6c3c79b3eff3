use crate::crypto::util::hex_to_bytes;
use crate::error::crypto::CryptoError;

use common::ErrorLocation;

use std::panic::Location;

use aes::{Aes128, Aes192, Aes256};
use cmac::digest::{InvalidLength, KeyInit};
use cmac::{Cmac, Mac};

/// AES-CMAC of `message` under the hex-encoded `key`, as lowercase hex.
///
/// The key length picks the cipher: 16, 24 or 32 bytes for AES-128, AES-192
/// or AES-256.
#[track_caller]
pub fn sign(message: &str, key: &str) -> Result<String, CryptoError> {
    let key = hex_to_bytes(key)?;
    let tag = match key.len() {
        16 => cmac::<Cmac<Aes128>>(&key, message),
        24 => cmac::<Cmac<Aes192>>(&key, message),
        32 => cmac::<Cmac<Aes256>>(&key, message),
        len => {
            return Err(CryptoError::InvalidKey {
                message: format!("row key must be 16, 24 or 32 bytes, got {len}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }
    };

    tag.map_err(|e| CryptoError::InvalidKey {
        message: format!("row key rejected: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

fn cmac<M: Mac + KeyInit>(key: &[u8], message: &str) -> Result<String, InvalidLength> {
    let mut mac = <M as Mac>::new_from_slice(key)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
