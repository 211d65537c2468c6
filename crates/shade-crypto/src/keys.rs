//! X25519 box keypairs

use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// An X25519 keypair used for message boxes.
///
/// The secret half zeroizes on drop (`StaticSecret` handles it).
#[derive(Clone)]
pub struct BoxKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl BoxKeypair {
    /// Keypair whose secret scalar is `seed` (clamped by X25519 at use).
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Fresh random keypair, used for per-message ephemeral keys.
    pub fn generate() -> Self {
        let mut seed = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);
        let kp = Self::from_seed(seed);
        seed.zeroize();
        kp
    }

    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Raw X25519 output against `peer`.
    pub fn diffie_hellman(&self, peer: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
        let peer = PublicKey::from(*peer);
        self.secret.diffie_hellman(&peer).to_bytes()
    }
}

impl PartialEq for BoxKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public
    }
}

impl Eq for BoxKeypair {}

impl std::fmt::Debug for BoxKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxKeypair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
