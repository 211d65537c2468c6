//! shade-crypto: identity derivation and message encryption for Shade
//!
//! Everything in this crate is a pure function over its inputs. Nothing holds
//! shared mutable state, so every entry point is safe to call from many
//! threads at once.
//!
//! Derivation tree:
//! ```text
//! primary wallet signature over the shadow challenge
//!   └── SHA-256(sig ‖ ":" ‖ hashed_user_id ‖ ":" ‖ index)  → Ed25519 shadow wallet #index
//!
//! any wallet's signature over (domain tag ‖ base58(wallet))
//!   └── SHA-256(sig)  → X25519 box keypair (messaging identity)
//! ```
//!
//! Message record crypto:
//! ```text
//! content:   X25519(own, peer) → HSalsa20 → XSalsa20-Poly1305(tag ‖ utf8)   (NaCl box)
//! metadata:  X25519(ephemeral, cluster) → Rescue keystream over GF(2^127 - 1)
//!              ├── enc(SHA-256(sender wallet))     nonce
//!              └── enc(SHA-256(recipient wallet))  nonce + 1
//! ```

pub mod content;
pub mod hash;
pub mod keys;
pub mod messaging;
pub mod metadata;
pub mod rescue;
pub mod shadow;
pub mod vault;

pub use content::{decrypt, encrypt, ContentSession, DecryptedContent, DirectionTag, SealedContent};
pub use hash::{hash_user_id, sha256, sha256_parts, wallet_hash};
pub use keys::BoxKeypair;
pub use messaging::{key_derivation_message, keypair_from_signature, matches_on_chain};
pub use metadata::{cluster_shared_secret, encrypt_hash, reveal_hash, MetadataSealer, SealedMetadata};
pub use shadow::{derive_shadow_keypair, derive_shadow_keypairs, ShadowKeypair};
pub use vault::{KdfParams, SealedKey};

/// Size of an X25519 / Ed25519 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an XSalsa20 / XChaCha20 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wallet signature (Ed25519)
pub const SIGNATURE_SIZE: usize = 64;

/// Largest content ciphertext the ledger accepts
pub const MAX_CIPHERTEXT_LEN: usize = 256;
