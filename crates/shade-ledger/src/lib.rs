//! shade-ledger: deterministic addressing, account layouts, and ledger backends
//!
//! The ledger is an append-only key-value store addressed by program-derived
//! addresses. [`LedgerReader`] is what the reconstructor consumes;
//! [`LedgerWriter`] models the instructions a wallet submits.

pub mod address;
pub mod cluster;
pub mod ledger;
pub mod memory;
pub mod posts;
pub mod records;
pub mod retry;
pub mod rpc;

pub use address::{create_program_address, find_program_address, AddressScheme};
pub use cluster::{MpcCluster, Participants};
pub use ledger::{LedgerError, LedgerReader, LedgerWriter, RawAccount, SubmitMessage};
pub use memory::MemoryLedger;
pub use records::{MessageRecord, UserAccount};
pub use retry::{with_retry, RetryPolicy};
pub use rpc::RpcLedger;
