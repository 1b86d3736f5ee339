//! Token codec: high-entropy raw tokens and their one-way lookup digest.
//!
//! The raw token is returned to the caller exactly once and is never
//! persisted or logged; only the sha256 digest is stored.

use rand::RngCore;
use rand::rngs::OsRng;

/// Bytes of OS randomness per token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Generate a fresh raw token and its lookup hash.
pub fn generate() -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);

    let raw = hex::encode(bytes);
    let digest = hash(&raw);

    (raw, digest)
}

/// Derive the stored digest for an incoming raw token. Pure, so lookups
/// never compare raw values.
pub fn hash(raw: &str) -> String {
    sha256::digest(raw)
}
