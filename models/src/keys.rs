use common::RedactedKey;

/// Signing keys issued by the KMS after a successful registration handshake.
///
/// `row_key` signs individual events (symmetric), `batch_key` signs batches
/// (asymmetric). Immutable once obtained; a re-registration replaces the pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsKeys {
    pub batch_key: RedactedKey,
    pub row_key: RedactedKey,
}

impl KmsKeys {
    pub fn new(batch_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            batch_key: RedactedKey::new(batch_key),
            row_key: RedactedKey::new(row_key),
        }
    }
}
