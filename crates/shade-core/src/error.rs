use thiserror::Error;

pub type ShadeResult<T> = Result<T, ShadeError>;

/// Authenticated decryption rejected the ciphertext.
///
/// Routine during trial decryption: it only means "not this key".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("decryption failed: authentication mismatch")]
pub struct DecryptionFailure;

/// A fetched ledger record could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {record} record: {reason}")]
pub struct RecordParseError {
    pub record: &'static str,
    pub reason: String,
}

impl RecordParseError {
    pub fn new(record: &'static str, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ShadeError {
    #[error("derivation input error: {0}")]
    DerivationInput(String),

    #[error(transparent)]
    DecryptionFailure(#[from] DecryptionFailure),

    #[error(transparent)]
    RecordParse(#[from] RecordParseError),

    #[error("ledger unavailable after {attempts} attempt(s): {reason}")]
    LedgerUnavailable { attempts: u32, reason: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("messaging key for {wallet} does not match the registered key; run a key sync")]
    KeyMismatch { wallet: String },

    #[error("signing request was cancelled")]
    SigningCancelled,

    #[error("message content too long: {len} bytes (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("ledger rejected request: {0}")]
    Rejected(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShadeError {
    /// Errors that must never be retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShadeError::DerivationInput(_)
                | ShadeError::Unauthorized(_)
                | ShadeError::KeyMismatch { .. }
                | ShadeError::SigningCancelled
        )
    }
}
