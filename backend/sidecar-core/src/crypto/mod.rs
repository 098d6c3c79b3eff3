//! Signing primitives.
//!
//! Keys arrive hex-encoded from the KMS. Rows are signed with a keyed MAC
//! ([`symmetric`]), batches with Ed25519 ([`asymmetric`]). Signatures are
//! returned hex-encoded.

pub mod asymmetric;
pub mod symmetric;
pub mod util;
