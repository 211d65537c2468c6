//! Passphrase-sealed messaging key for local caching
//!
//! A cached key is a convenience only: losing the file costs one fresh
//! wallet signature. The sealed form is JSON:
//!
//! ```text
//! Argon2id(passphrase, salt) → vault key
//! XChaCha20-Poly1305(vault key, nonce, aad = public key) → box secret
//! ```

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use shade_core::{DecryptionFailure, ShadeError, ShadeResult};
use tracing::debug;
use zeroize::Zeroize;

use crate::keys::BoxKeypair;
use crate::{KEY_SIZE, NONCE_SIZE};

const SALT_SIZE: usize = 16;
const VAULT_VERSION: u8 = 1;

/// Argon2id parameters for the vault KDF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// A box secret sealed under a passphrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    pub version: u8,
    /// Hex public key, readable without the passphrase
    pub public: String,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    pub kdf: KdfParams,
}

struct VaultKey([u8; KEY_SIZE]);

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

fn derive_vault_key(
    passphrase: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> ShadeResult<VaultKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| ShadeError::Config(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
    let mut key = VaultKey([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key.0)
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;
    Ok(key)
}

impl SealedKey {
    pub fn seal(
        keypair: &BoxKeypair,
        passphrase: &SecretString,
        params: &KdfParams,
    ) -> ShadeResult<Self> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let key = derive_vault_key(passphrase, &salt, params)?;
        let cipher = XChaCha20Poly1305::new((&key.0).into());
        let public = keypair.public_bytes();
        let mut secret = keypair.secret_bytes();

        let ciphertext = cipher.encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &secret,
                aad: &public,
            },
        );
        secret.zeroize();
        let ciphertext = ciphertext.map_err(|e| anyhow::anyhow!("key sealing failed: {e}"))?;

        Ok(Self {
            version: VAULT_VERSION,
            public: hex::encode(public),
            salt: B64.encode(salt),
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
            kdf: params.clone(),
        })
    }

    /// Wrong passphrase or tampered fields yield `DecryptionFailure`.
    pub fn open(&self, passphrase: &SecretString) -> ShadeResult<BoxKeypair> {
        if self.version != VAULT_VERSION {
            return Err(ShadeError::Config(format!(
                "unsupported vault version {}",
                self.version
            )));
        }
        let public = self.public_key()?;
        let salt = decode_field("salt", &self.salt)?;
        let nonce = decode_field("nonce", &self.nonce)?;
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;
        if nonce.len() != NONCE_SIZE {
            return Err(ShadeError::Config(format!(
                "vault nonce must be {NONCE_SIZE} bytes, got {}",
                nonce.len()
            )));
        }

        let key = derive_vault_key(passphrase, &salt, &self.kdf)?;
        let cipher = XChaCha20Poly1305::new((&key.0).into());
        let mut plaintext = cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &public,
                },
            )
            .map_err(|_| DecryptionFailure)?;

        let seed: Result<[u8; KEY_SIZE], _> = plaintext.as_slice().try_into();
        plaintext.zeroize();
        let mut seed = seed.map_err(|_| DecryptionFailure)?;
        let keypair = BoxKeypair::from_seed(seed);
        seed.zeroize();

        if keypair.public_bytes() != public {
            debug!("vault opened but key does not match its recorded public half");
            return Err(DecryptionFailure.into());
        }
        Ok(keypair)
    }

    pub fn public_key(&self) -> ShadeResult<[u8; KEY_SIZE]> {
        let bytes = hex::decode(&self.public)
            .map_err(|e| ShadeError::Config(format!("vault public key: {e}")))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| ShadeError::Config("vault public key must be 32 bytes".into()))
    }

    pub fn to_json(&self) -> ShadeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ShadeError::Other(e.into()))
    }

    pub fn from_json(s: &str) -> ShadeResult<Self> {
        serde_json::from_str(s).map_err(|e| ShadeError::Config(format!("vault json: {e}")))
    }
}

fn decode_field(name: &str, value: &str) -> ShadeResult<Vec<u8>> {
    B64.decode(value)
        .map_err(|e| ShadeError::Config(format!("vault {name}: {e}")))
}
