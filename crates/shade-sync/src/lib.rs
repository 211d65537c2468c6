//! shade-sync: the client side of private messaging
//!
//! Everything here is re-runnable from zero local state. The ledger is the
//! only source of truth; the contact book is a cache reconciled against it.

pub mod context;
pub mod directory;
pub mod keys;
pub mod reconstruct;
pub mod send;
pub mod state;

pub use context::SyncContext;
pub use directory::{DirectoryError, NameDirectory, ResolvedPost};
pub use keys::{
    check_key_status, derive_messaging_keypair, sync_keys, unlock, KeyStatus, KeypairSigner,
    MessageSigner,
};
pub use reconstruct::{reconstruct, Conversation, DecodedMessage, Inbox, MessageRequest};
pub use send::{mark_read, send_message, SentMessage};
pub use state::{Contact, ContactBook};
