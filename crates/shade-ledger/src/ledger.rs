//! The ledger collaborator: an append-only account store
//!
//! Readers are all the reconstructor needs. Writers model the program
//! instructions a wallet would submit; the signing wallet is passed
//! explicitly because the ledger enforces authority by it.

use std::time::Duration;

use async_trait::async_trait;
use shade_core::{Address, ShadeError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("account {0} already in use")]
    AddressInUse(Address),

    #[error("account {0} not found")]
    AccountNotFound(Address),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Worth retrying with backoff; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_) | LedgerError::Timeout(_) => true,
            // JSON-RPC server-error range plus internal error
            LedgerError::Rpc { code, .. } => (-32099..=-32000).contains(code) || *code == -32603,
            _ => false,
        }
    }
}

impl From<LedgerError> for ShadeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unauthorized(reason) => ShadeError::Unauthorized(reason),
            e if e.is_transient() => ShadeError::LedgerUnavailable {
                attempts: 1,
                reason: e.to_string(),
            },
            e => ShadeError::Rejected(e.to_string()),
        }
    }
}

/// One account as returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccount {
    pub address: Address,
    pub data: Vec<u8>,
}

/// Arguments of the private-message instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitMessage {
    pub index: u64,
    pub encrypted_sender_hash: [u8; 32],
    pub encrypted_recipient_hash: [u8; 32],
    pub content: Vec<u8>,
    pub content_nonce: [u8; 24],
    pub mpc_pubkey: [u8; 32],
    pub mpc_nonce: u128,
}

#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Every program account whose data is exactly `size` bytes.
    async fn scan_accounts_by_size(&self, size: usize) -> Result<Vec<RawAccount>, LedgerError>;

    async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>, LedgerError>;
}

#[async_trait]
pub trait LedgerWriter: LedgerReader {
    /// Create the owner's `UserAccount`; fails with `AddressInUse` if present.
    async fn register_identity(
        &self,
        owner: &Address,
        x25519_pubkey: [u8; 32],
    ) -> Result<Address, LedgerError>;

    async fn update_identity_key(
        &self,
        owner: &Address,
        new_x25519_pubkey: [u8; 32],
    ) -> Result<(), LedgerError>;

    /// Init-once at `message_address(sender, msg.index)`; a second submit at
    /// the same index fails with `AddressInUse`.
    async fn submit_message(
        &self,
        sender: &Address,
        msg: SubmitMessage,
    ) -> Result<Address, LedgerError>;

    /// Returns `true` when this call flipped the flag, `false` if it was
    /// already read. Only the resolved recipient may call it.
    async fn mark_read(&self, reader: &Address, message: &Address) -> Result<bool, LedgerError>;
}
