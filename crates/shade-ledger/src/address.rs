//! Deterministic program-derived addresses
//!
//! `address = SHA-256(seed_0 ‖ … ‖ seed_n ‖ [bump] ‖ program_id ‖ "ProgramDerivedAddress")`
//! with `bump` searched downward from 255 until the hash is not a valid
//! Ed25519 point, so no private key can exist for it.

use std::collections::HashSet;

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};
use shade_core::config::{SeedConfig, ShadeConfig};
use shade_core::{Address, ShadeError, ShadeResult};

pub const MAX_SEED_LEN: usize = 32;
pub const MAX_SEEDS: usize = 16;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Hash `seeds` under `program_id`; `None` when the result lies on the curve.
pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> ShadeResult<Option<Address>> {
    check_seeds(seeds)?;
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return Ok(None);
    }
    Ok(Some(Address::new(hash)))
}

/// First off-curve address with the highest bump.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Address) -> ShadeResult<(Address, u8)> {
    // one slot is taken by the bump seed
    if seeds.len() >= MAX_SEEDS {
        return Err(ShadeError::DerivationInput(format!(
            "at most {} seeds allowed, got {}",
            MAX_SEEDS - 1,
            seeds.len()
        )));
    }
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
        with_bump.extend_from_slice(seeds);
        with_bump.push(&bump_seed);
        if let Some(addr) = create_program_address(&with_bump, program_id)? {
            return Ok((addr, bump));
        }
    }
    Err(ShadeError::DerivationInput(
        "no off-curve bump found for seeds".into(),
    ))
}

fn check_seeds(seeds: &[&[u8]]) -> ShadeResult<()> {
    if seeds.len() > MAX_SEEDS {
        return Err(ShadeError::DerivationInput(format!(
            "at most {MAX_SEEDS} seeds allowed, got {}",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(ShadeError::DerivationInput(format!(
            "seed of {} bytes exceeds the {MAX_SEED_LEN}-byte limit",
            seed.len()
        )));
    }
    Ok(())
}

fn is_on_curve(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

/// Seed strings and program id for every record family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressScheme {
    program_id: Address,
    user_seed: String,
    message_seed: String,
    post_seed: String,
}

impl AddressScheme {
    pub fn new(program_id: Address, seeds: &SeedConfig) -> Self {
        Self {
            program_id,
            user_seed: seeds.user.clone(),
            message_seed: seeds.message.clone(),
            post_seed: seeds.post.clone(),
        }
    }

    pub fn from_config(config: &ShadeConfig) -> ShadeResult<Self> {
        Ok(Self::new(config.ledger.program_address()?, &config.seeds))
    }

    pub fn program_id(&self) -> &Address {
        &self.program_id
    }

    /// `[user_seed, owner]`
    pub fn user_address(&self, owner: &Address) -> ShadeResult<(Address, u8)> {
        find_program_address(
            &[self.user_seed.as_bytes(), owner.as_bytes()],
            &self.program_id,
        )
    }

    /// `[message_seed, sender, le_u64(index)]`; the recipient never appears.
    pub fn message_address(&self, sender: &Address, index: u64) -> ShadeResult<(Address, u8)> {
        find_program_address(
            &[
                self.message_seed.as_bytes(),
                sender.as_bytes(),
                &index.to_le_bytes(),
            ],
            &self.program_id,
        )
    }

    /// `[post_seed, author, target]`
    pub fn post_address(&self, author: &Address, target: &str) -> ShadeResult<(Address, u8)> {
        find_program_address(
            &[self.post_seed.as_bytes(), author.as_bytes(), target.as_bytes()],
            &self.program_id,
        )
    }

    /// Message addresses `0..count` of one sender.
    pub fn message_addresses(&self, sender: &Address, count: u64) -> ShadeResult<HashSet<Address>> {
        (0..count)
            .map(|i| self.message_address(sender, i).map(|(addr, _)| addr))
            .collect()
    }
}
