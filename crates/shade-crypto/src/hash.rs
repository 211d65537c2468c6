//! SHA-256 helpers shared by every derivation

use sha2::{Digest, Sha256};
use shade_core::Address;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hash the concatenation of `parts` without allocating the joined buffer.
pub fn sha256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// One-way hash of a raw user identifier, lower-case hex.
///
/// The shadow deriver only ever sees this value.
pub fn hash_user_id(raw: &str) -> String {
    hex::encode(sha256(raw.as_bytes()))
}

/// The identity hash the metadata cipher hides for a wallet.
pub fn wallet_hash(wallet: &Address) -> [u8; 32] {
    sha256(wallet.as_bytes())
}
