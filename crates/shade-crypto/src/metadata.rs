//! Participant metadata: sender/recipient wallet hashes sealed for the MPC cluster
//!
//! Each 32-byte hash is split into four little-endian `u64` lanes. Lane `i`
//! is encrypted as `(m + Rescue(k0, k1, nonce, i + 1)[0]) mod p` and the
//! result truncated to its low 8 bytes, so the ciphertext stays 32 bytes.
//!
//! The key `(k0, k1)` is the X25519 output between a per-message ephemeral
//! key and the cluster key, split into two 16-byte halves. Only the cluster
//! can recompute it from the published ephemeral public key.

use rand::RngCore;
use shade_core::Address;
use zeroize::Zeroize;

use crate::hash::wallet_hash;
use crate::keys::BoxKeypair;
use crate::rescue::{Fe, Rescue};
use crate::KEY_SIZE;

const LANES: usize = 4;

/// Everything a message record carries for the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMetadata {
    pub encrypted_sender_hash: [u8; 32],
    pub encrypted_recipient_hash: [u8; 32],
    pub ephemeral_pubkey: [u8; KEY_SIZE],
    pub nonce: u128,
}

/// Seals metadata against a fixed cluster public key.
#[derive(Debug, Clone)]
pub struct MetadataSealer {
    cluster_pubkey: [u8; KEY_SIZE],
}

impl MetadataSealer {
    pub fn new(cluster_pubkey: [u8; KEY_SIZE]) -> Self {
        Self { cluster_pubkey }
    }

    pub fn cluster_pubkey(&self) -> &[u8; KEY_SIZE] {
        &self.cluster_pubkey
    }

    /// Fresh ephemeral key and nonce per call; never reuse either.
    pub fn seal(&self, sender: &Address, recipient: &Address) -> SealedMetadata {
        let ephemeral = BoxKeypair::generate();
        let mut shared = cluster_shared_secret(&ephemeral, &self.cluster_pubkey);

        let mut nonce_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = u128::from_le_bytes(nonce_bytes);

        let sealed = SealedMetadata {
            encrypted_sender_hash: encrypt_hash(&wallet_hash(sender), &shared, nonce),
            encrypted_recipient_hash: encrypt_hash(
                &wallet_hash(recipient),
                &shared,
                recipient_nonce(nonce),
            ),
            ephemeral_pubkey: ephemeral.public_bytes(),
            nonce,
        };
        shared.zeroize();
        sealed
    }
}

/// The recipient hash is encrypted under `nonce + 1` so the two hashes
/// never share a keystream.
pub fn recipient_nonce(nonce: u128) -> u128 {
    nonce.wrapping_add(1)
}

/// X25519 between one side's secret and the other side's public key.
pub fn cluster_shared_secret(own: &BoxKeypair, peer_public: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    own.diffie_hellman(peer_public)
}

pub fn encrypt_hash(hash: &[u8; 32], shared: &[u8; KEY_SIZE], nonce: u128) -> [u8; 32] {
    let ks = keystream(shared, nonce);
    let mut out = [0u8; 32];
    for lane in 0..LANES {
        let m = read_lane(hash, lane);
        let c = Fe::new(m as u128) + ks[lane];
        out[lane * 8..lane * 8 + 8].copy_from_slice(&(c.value() as u64).to_le_bytes());
    }
    out
}

/// Cluster-side inverse of [`encrypt_hash`].
///
/// Each lane has two candidate plaintexts (with and without the modular
/// wrap); the one that re-encrypts to the observed low bits is taken. The
/// two only coincide when the lane key lies within `2^64` of `p` and the
/// plaintext lane is `0` or `u64::MAX`.
pub fn reveal_hash(ciphertext: &[u8; 32], shared: &[u8; KEY_SIZE], nonce: u128) -> [u8; 32] {
    let ks = keystream(shared, nonce);
    let mut out = [0u8; 32];
    for lane in 0..LANES {
        let t = read_lane(ciphertext, lane);
        let k = ks[lane];
        let plain = t.wrapping_sub(k.value() as u64);
        let reencrypted = (Fe::new(plain as u128) + k).value() as u64;
        let m = if reencrypted == t {
            plain
        } else {
            plain.wrapping_sub(1)
        };
        out[lane * 8..lane * 8 + 8].copy_from_slice(&m.to_le_bytes());
    }
    out
}

fn keystream(shared: &[u8; KEY_SIZE], nonce: u128) -> [Fe; LANES] {
    let mut lo = [0u8; 16];
    let mut hi = [0u8; 16];
    lo.copy_from_slice(&shared[..16]);
    hi.copy_from_slice(&shared[16..]);
    let key = [Fe::from_le_bytes(lo), Fe::from_le_bytes(hi)];
    lo.zeroize();
    hi.zeroize();

    let rescue = Rescue::shared();
    let nonce = Fe::new(nonce);
    let mut ks = [Fe::ZERO; LANES];
    for (i, slot) in ks.iter_mut().enumerate() {
        *slot = rescue.keystream(key, nonce, i as u64 + 1);
    }
    ks
}

fn read_lane(bytes: &[u8; 32], lane: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[lane * 8..lane * 8 + 8]);
    u64::from_le_bytes(buf)
}
