//! Messaging identity: the signature-to-box-keypair half of key derivation
//!
//! The signing step lives with the async wallet collaborator in `shade-sync`;
//! this module only builds the message and turns a signature into a keypair.

use shade_core::{Address, ShadeError, ShadeResult};
use zeroize::Zeroize;

use crate::hash::sha256;
use crate::keys::BoxKeypair;
use crate::{KEY_SIZE, SIGNATURE_SIZE};

/// Bytes the wallet signs: `domain_tag ‖ base58(wallet)`.
pub fn key_derivation_message(domain_tag: &str, wallet: &Address) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain_tag.len() + 44);
    msg.extend_from_slice(domain_tag.as_bytes());
    msg.extend_from_slice(wallet.to_base58().as_bytes());
    msg
}

/// `BoxKeypair::from_seed(SHA-256(signature))`
pub fn keypair_from_signature(signature: &[u8]) -> ShadeResult<BoxKeypair> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(ShadeError::DerivationInput(format!(
            "wallet signature must be {SIGNATURE_SIZE} bytes, got {}",
            signature.len()
        )));
    }
    let mut seed = sha256(signature);
    let kp = BoxKeypair::from_seed(seed);
    seed.zeroize();
    Ok(kp)
}

pub fn matches_on_chain(derived: &[u8; KEY_SIZE], on_chain: &[u8; KEY_SIZE]) -> bool {
    derived == on_chain
}
