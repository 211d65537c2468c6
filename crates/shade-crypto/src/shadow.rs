//! Shadow wallets: unlinkable Ed25519 keypairs derived from one signature
//!
//! `seed = SHA-256(signature ‖ ":" ‖ hashed_user_id ‖ ":" ‖ decimal(index))`
//!
//! The seed is used as an Ed25519 secret seed, never as a raw scalar. The
//! signature itself is verified upstream; this module trusts its caller.

use ed25519_dalek::{Signer, SigningKey};
use shade_core::{Address, ShadeError, ShadeResult};
use zeroize::Zeroize;

use crate::hash::sha256_parts;
use crate::SIGNATURE_SIZE;

/// Length of a hex-encoded SHA-256 user id
const HASHED_USER_ID_LEN: usize = 64;

/// A derived shadow wallet. The signing key zeroizes itself on drop.
pub struct ShadowKeypair {
    index: u32,
    signing: SigningKey,
}

impl ShadowKeypair {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn address(&self) -> Address {
        Address::new(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// 64-byte `secret ‖ public` export in base58, the format wallets import.
    pub fn to_base58_secret(&self) -> String {
        let mut bytes = self.signing.to_keypair_bytes();
        let encoded = bs58::encode(&bytes).into_string();
        bytes.zeroize();
        encoded
    }
}

impl std::fmt::Debug for ShadowKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowKeypair")
            .field("index", &self.index)
            .field("address", &self.address())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derive shadow wallet `index` for the given primary-wallet signature.
pub fn derive_shadow_keypair(
    signature: &[u8],
    hashed_user_id: &str,
    index: u32,
) -> ShadeResult<ShadowKeypair> {
    validate_inputs(signature, hashed_user_id)?;

    let index_str = index.to_string();
    let mut seed = sha256_parts(&[
        signature,
        b":",
        hashed_user_id.as_bytes(),
        b":",
        index_str.as_bytes(),
    ]);
    let signing = SigningKey::from_bytes(&seed);
    seed.zeroize();

    Ok(ShadowKeypair { index, signing })
}

/// Derive shadow wallets `0..count`.
pub fn derive_shadow_keypairs(
    signature: &[u8],
    hashed_user_id: &str,
    count: u32,
) -> ShadeResult<Vec<ShadowKeypair>> {
    validate_inputs(signature, hashed_user_id)?;
    (0..count)
        .map(|i| derive_shadow_keypair(signature, hashed_user_id, i))
        .collect()
}

fn validate_inputs(signature: &[u8], hashed_user_id: &str) -> ShadeResult<()> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(ShadeError::DerivationInput(format!(
            "signature must be {SIGNATURE_SIZE} bytes, got {}",
            signature.len()
        )));
    }
    if hashed_user_id.len() != HASHED_USER_ID_LEN
        || !hashed_user_id.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(ShadeError::DerivationInput(
            "hashed user id must be 64 hex characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_user_id;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn sig() -> [u8; 64] {
        let mut s = [0u8; 64];
        for (i, b) in s.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(13);
        }
        s
    }

    #[test]
    fn test_derivation_deterministic() {
        let uid = hash_user_id("user-42");
        let a = derive_shadow_keypair(&sig(), &uid, 3).unwrap();
        let b = derive_shadow_keypair(&sig(), &uid, 3).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.to_base58_secret(), b.to_base58_secret());
    }

    #[test]
    fn test_seed_formula() {
        let uid = hash_user_id("user-42");
        let mut preimage = sig().to_vec();
        preimage.extend_from_slice(b":");
        preimage.extend_from_slice(uid.as_bytes());
        preimage.extend_from_slice(b":12");
        let expected_seed = crate::hash::sha256(&preimage);
        let expected = SigningKey::from_bytes(&expected_seed).verifying_key().to_bytes();
        let kp = derive_shadow_keypair(&sig(), &uid, 12).unwrap();
        assert_eq!(kp.address().to_bytes(), expected);
    }

    #[test]
    fn test_batch_matches_single() {
        let uid = hash_user_id("user-42");
        let batch = derive_shadow_keypairs(&sig(), &uid, 5).unwrap();
        assert_eq!(batch.len(), 5);
        for kp in &batch {
            let single = derive_shadow_keypair(&sig(), &uid, kp.index()).unwrap();
            assert_eq!(single.address(), kp.address());
        }
    }

    #[test]
    fn test_uniqueness_over_sample() {
        let uid = hash_user_id("user-42");
        let batch = derive_shadow_keypairs(&sig(), &uid, 500).unwrap();
        let distinct: HashSet<_> = batch.iter().map(|k| k.address()).collect();
        assert_eq!(distinct.len(), 500);
    }

    #[test]
    fn test_rejects_short_signature() {
        let uid = hash_user_id("user-42");
        let err = derive_shadow_keypair(&[0u8; 63], &uid, 0).unwrap_err();
        assert!(matches!(err, ShadeError::DerivationInput(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejects_raw_user_id() {
        let err = derive_shadow_keypair(&sig(), "alice@example.com", 0).unwrap_err();
        assert!(matches!(err, ShadeError::DerivationInput(_)));
    }

    #[test]
    fn test_signature_verifies() {
        use ed25519_dalek::{Signature, Verifier};
        let kp = derive_shadow_keypair(&sig(), &hash_user_id("u"), 0).unwrap();
        let raw = kp.sign(b"hello");
        let vk = kp.signing_key().verifying_key();
        assert!(vk.verify(b"hello", &Signature::from_bytes(&raw)).is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let kp = derive_shadow_keypair(&sig(), &hash_user_id("u"), 0).unwrap();
        let dbg = format!("{kp:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(&kp.to_base58_secret()));
    }

    proptest! {
        #[test]
        fn different_indices_give_different_wallets(a in 0u32..100_000, b in 0u32..100_000) {
            prop_assume!(a != b);
            let uid = hash_user_id("prop-user");
            let ka = derive_shadow_keypair(&sig(), &uid, a).unwrap();
            let kb = derive_shadow_keypair(&sig(), &uid, b).unwrap();
            prop_assert_ne!(ka.address(), kb.address());
        }

        #[test]
        fn derivation_is_pure(seed in proptest::collection::vec(any::<u8>(), 64), index in any::<u32>()) {
            let uid = hash_user_id("prop-user");
            let ka = derive_shadow_keypair(&seed, &uid, index).unwrap();
            let kb = derive_shadow_keypair(&seed, &uid, index).unwrap();
            prop_assert_eq!(ka.address(), kb.address());
        }
    }
}
