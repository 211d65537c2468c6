//! Fixed account layouts, little-endian throughout
//!
//! ```text
//! UserAccount (81 bytes)
//!   0   discriminator        8
//!   8   wallet              32
//!   40  x25519 pubkey       32
//!   72  message counter      8
//!   80  bump                 1
//!
//! MessageRecord (413 bytes allocated)
//!   0      discriminator             8
//!   8      encrypted sender hash    32
//!   40     encrypted recipient hash 32
//!   72     content length (u32)      4
//!   76     content                 len (≤ 256)
//!   +len   content nonce            24
//!   +24    timestamp (i64)           8
//!   +8     mpc ephemeral pubkey     32
//!   +32    mpc nonce (u128)         16
//!   +16    bump                      1
//! ```
//!
//! Every read is bounds-checked and fails with `RecordParseError`; nothing
//! here can panic on hostile input.

use shade_core::{Address, RecordParseError};
use shade_crypto::hash::sha256;

pub const DISCRIMINATOR_SIZE: usize = 8;

/// Largest content ciphertext a message record can hold
pub const MAX_CONTENT_LEN: usize = 256;

/// First 8 bytes of `SHA-256("account:<name>")`
pub fn discriminator(name: &str) -> [u8; DISCRIMINATOR_SIZE] {
    let digest = sha256(format!("account:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_SIZE];
    out.copy_from_slice(&digest[..DISCRIMINATOR_SIZE]);
    out
}

/// Cursor over account bytes that never reads out of bounds.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    record: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(record: &'static str, buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            record,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], RecordParseError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.buf.len());
        let Some(end) = end else {
            return Err(RecordParseError::new(
                self.record,
                format!(
                    "truncated: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len().saturating_sub(self.pos)
                ),
            ));
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], RecordParseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, RecordParseError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, RecordParseError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, RecordParseError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, RecordParseError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, RecordParseError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    /// `u32` length prefix followed by that many bytes, capped at `max`.
    pub fn read_prefixed(&mut self, max: usize) -> Result<&'a [u8], RecordParseError> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(RecordParseError::new(
                self.record,
                format!("length prefix {len} exceeds maximum {max}"),
            ));
        }
        self.read_bytes(len)
    }

    pub fn expect_discriminator(&mut self, expected: [u8; 8]) -> Result<(), RecordParseError> {
        let found: [u8; 8] = self.read_array()?;
        if found != expected {
            return Err(RecordParseError::new(
                self.record,
                format!("bad discriminator {}", hex::encode(found)),
            ));
        }
        Ok(())
    }
}

/// Registered messaging identity of one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub wallet: Address,
    pub x25519_pubkey: [u8; 32],
    /// Next unused per-sender message index
    pub message_count: u64,
    pub bump: u8,
}

impl UserAccount {
    pub const NAME: &'static str = "UserAccount";
    pub const SIZE: usize = DISCRIMINATOR_SIZE + 32 + 32 + 8 + 1;

    pub fn discriminator() -> [u8; 8] {
        discriminator(Self::NAME)
    }

    pub fn decode(data: &[u8]) -> Result<Self, RecordParseError> {
        let mut r = ByteReader::new(Self::NAME, data);
        r.expect_discriminator(Self::discriminator())?;
        Ok(Self {
            wallet: Address::new(r.read_array()?),
            x25519_pubkey: r.read_array()?,
            message_count: r.read_u64()?,
            bump: r.read_u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&Self::discriminator());
        out.extend_from_slice(self.wallet.as_bytes());
        out.extend_from_slice(&self.x25519_pubkey);
        out.extend_from_slice(&self.message_count.to_le_bytes());
        out.push(self.bump);
        out
    }
}

/// A stored private message. Only `timestamp` is meaningful in the clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub encrypted_sender_hash: [u8; 32],
    pub encrypted_recipient_hash: [u8; 32],
    pub content: Vec<u8>,
    pub content_nonce: [u8; 24],
    pub timestamp: i64,
    pub mpc_pubkey: [u8; 32],
    pub mpc_nonce: u128,
    pub bump: u8,
}

impl MessageRecord {
    pub const NAME: &'static str = "PrivateMessageAccount";
    pub const SIZE: usize =
        DISCRIMINATOR_SIZE + 32 + 32 + 4 + MAX_CONTENT_LEN + 24 + 8 + 32 + 16 + 1;

    pub fn discriminator() -> [u8; 8] {
        discriminator(Self::NAME)
    }

    pub fn decode(data: &[u8]) -> Result<Self, RecordParseError> {
        let mut r = ByteReader::new(Self::NAME, data);
        r.expect_discriminator(Self::discriminator())?;
        let encrypted_sender_hash = r.read_array()?;
        let encrypted_recipient_hash = r.read_array()?;
        let content = r.read_prefixed(MAX_CONTENT_LEN)?.to_vec();
        Ok(Self {
            encrypted_sender_hash,
            encrypted_recipient_hash,
            content,
            content_nonce: r.read_array()?,
            timestamp: r.read_i64()?,
            mpc_pubkey: r.read_array()?,
            mpc_nonce: r.read_u128()?,
            bump: r.read_u8()?,
        })
    }

    /// Serialized form padded with zeros to the allocated `SIZE`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&Self::discriminator());
        out.extend_from_slice(&self.encrypted_sender_hash);
        out.extend_from_slice(&self.encrypted_recipient_hash);
        out.extend_from_slice(&(self.content.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.content);
        out.extend_from_slice(&self.content_nonce);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.mpc_pubkey);
        out.extend_from_slice(&self.mpc_nonce.to_le_bytes());
        out.push(self.bump);
        if out.len() < Self::SIZE {
            out.resize(Self::SIZE, 0);
        }
        out
    }
}
