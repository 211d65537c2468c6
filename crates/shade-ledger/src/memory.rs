//! In-memory ledger with the program's account semantics
//!
//! Used by tests and local simulation. Accounts are init-once, message
//! timestamps are assigned by the ledger and strictly increase, and
//! `mark_read` is authorised through the attached MPC cluster.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use shade_core::{Address, ShadeError};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::address::AddressScheme;
use crate::cluster::MpcCluster;
use crate::ledger::{LedgerError, LedgerReader, LedgerWriter, RawAccount, SubmitMessage};
use crate::posts::{revenue_split, validate_post, Post, RevenueSplit};
use crate::records::{MessageRecord, UserAccount, MAX_CONTENT_LEN};

#[derive(Default)]
struct State {
    accounts: BTreeMap<Address, Vec<u8>>,
    read: HashSet<Address>,
    last_timestamp: i64,
    treasury: u64,
}

pub struct MemoryLedger {
    scheme: AddressScheme,
    cluster: Option<Arc<MpcCluster>>,
    state: RwLock<State>,
    pending_faults: AtomicU32,
}

impl MemoryLedger {
    pub fn new(scheme: AddressScheme) -> Self {
        Self {
            scheme,
            cluster: None,
            state: RwLock::new(State::default()),
            pending_faults: AtomicU32::new(0),
        }
    }

    pub fn with_cluster(mut self, cluster: Arc<MpcCluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn scheme(&self) -> &AddressScheme {
        &self.scheme
    }

    /// Make the next `n` calls fail with a transient transport error.
    pub fn fail_next(&self, n: u32) {
        self.pending_faults.store(n, Ordering::SeqCst);
    }

    /// Store arbitrary bytes, bypassing every check.
    pub async fn insert_raw(&self, address: Address, data: Vec<u8>) {
        self.state.write().await.accounts.insert(address, data);
    }

    pub async fn is_read(&self, message: &Address) -> bool {
        self.state.read().await.read.contains(message)
    }

    pub async fn treasury_balance(&self) -> u64 {
        self.state.read().await.treasury
    }

    /// Create a post and pay out the treasury above its floor.
    pub async fn create_post(
        &self,
        author: &Address,
        target: &str,
        content: &str,
        bid: u64,
    ) -> Result<(Address, Option<RevenueSplit>), LedgerError> {
        self.take_fault()?;
        validate_post(target, content, bid).map_err(|e| LedgerError::Rejected(e.to_string()))?;
        let (address, bump) = self
            .scheme
            .post_address(author, target)
            .map_err(derivation_rejected)?;

        let mut state = self.state.write().await;
        if state.accounts.contains_key(&address) {
            return Err(LedgerError::AddressInUse(address));
        }
        state.treasury = state.treasury.saturating_add(bid);
        let split = revenue_split(state.treasury);
        if let Some(split) = split {
            state.treasury -= split.total();
        }

        let post = Post {
            author: *author,
            target: target.to_string(),
            content: content.to_string(),
            bid,
            timestamp: next_timestamp(&mut state),
            bump,
        };
        state.accounts.insert(address, post.encode());
        info!(%author, %address, bid, "post created");
        Ok((address, split))
    }

    fn take_fault(&self) -> Result<(), LedgerError> {
        let injected = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::Transport("injected fault".into()));
        }
        Ok(())
    }
}

fn derivation_rejected(e: ShadeError) -> LedgerError {
    LedgerError::Rejected(e.to_string())
}

fn next_timestamp(state: &mut State) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let ts = now.max(state.last_timestamp + 1);
    state.last_timestamp = ts;
    ts
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn scan_accounts_by_size(&self, size: usize) -> Result<Vec<RawAccount>, LedgerError> {
        self.take_fault()?;
        let state = self.state.read().await;
        Ok(state
            .accounts
            .iter()
            .filter(|(_, data)| data.len() == size)
            .map(|(address, data)| RawAccount {
                address: *address,
                data: data.clone(),
            })
            .collect())
    }

    async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>, LedgerError> {
        self.take_fault()?;
        Ok(self.state.read().await.accounts.get(address).cloned())
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn register_identity(
        &self,
        owner: &Address,
        x25519_pubkey: [u8; 32],
    ) -> Result<Address, LedgerError> {
        self.take_fault()?;
        let (address, bump) = self.scheme.user_address(owner).map_err(derivation_rejected)?;

        let mut state = self.state.write().await;
        if state.accounts.contains_key(&address) {
            return Err(LedgerError::AddressInUse(address));
        }
        let account = UserAccount {
            wallet: *owner,
            x25519_pubkey,
            message_count: 0,
            bump,
        };
        state.accounts.insert(address, account.encode());
        info!(wallet = %owner, %address, "identity registered");
        Ok(address)
    }

    async fn update_identity_key(
        &self,
        owner: &Address,
        new_x25519_pubkey: [u8; 32],
    ) -> Result<(), LedgerError> {
        self.take_fault()?;
        let (address, _) = self.scheme.user_address(owner).map_err(derivation_rejected)?;

        let mut state = self.state.write().await;
        let data = state
            .accounts
            .get(&address)
            .ok_or(LedgerError::AccountNotFound(address))?;
        let mut account =
            UserAccount::decode(data).map_err(|e| LedgerError::Rejected(e.to_string()))?;
        account.x25519_pubkey = new_x25519_pubkey;
        state.accounts.insert(address, account.encode());
        info!(wallet = %owner, "identity key updated");
        Ok(())
    }

    async fn submit_message(
        &self,
        sender: &Address,
        msg: SubmitMessage,
    ) -> Result<Address, LedgerError> {
        self.take_fault()?;
        if msg.content.len() > MAX_CONTENT_LEN {
            return Err(LedgerError::Rejected(format!(
                "message content exceeds maximum size ({} > {MAX_CONTENT_LEN})",
                msg.content.len()
            )));
        }
        let (address, bump) = self
            .scheme
            .message_address(sender, msg.index)
            .map_err(derivation_rejected)?;
        let (user_address, _) = self.scheme.user_address(sender).map_err(derivation_rejected)?;

        let mut state = self.state.write().await;
        if state.accounts.contains_key(&address) {
            debug!(%sender, index = msg.index, "message index already claimed");
            return Err(LedgerError::AddressInUse(address));
        }

        let record = MessageRecord {
            encrypted_sender_hash: msg.encrypted_sender_hash,
            encrypted_recipient_hash: msg.encrypted_recipient_hash,
            content: msg.content,
            content_nonce: msg.content_nonce,
            timestamp: next_timestamp(&mut state),
            mpc_pubkey: msg.mpc_pubkey,
            mpc_nonce: msg.mpc_nonce,
            bump,
        };
        state.accounts.insert(address, record.encode());

        let counter = state
            .accounts
            .get(&user_address)
            .and_then(|data| UserAccount::decode(data).ok());
        if let Some(mut account) = counter {
            account.message_count = account.message_count.max(msg.index.saturating_add(1));
            state.accounts.insert(user_address, account.encode());
        }

        debug!(%address, index = msg.index, "message stored");
        Ok(address)
    }

    async fn mark_read(&self, reader: &Address, message: &Address) -> Result<bool, LedgerError> {
        self.take_fault()?;
        let Some(cluster) = self.cluster.as_ref() else {
            return Err(LedgerError::Rejected("no MPC cluster attached".into()));
        };

        let mut state = self.state.write().await;
        let data = state
            .accounts
            .get(message)
            .ok_or(LedgerError::AccountNotFound(*message))?;
        let record =
            MessageRecord::decode(data).map_err(|e| LedgerError::Rejected(e.to_string()))?;

        if !cluster.verify_access(&record, reader) {
            return Err(LedgerError::Unauthorized(
                "only the recipient may mark a message read".into(),
            ));
        }
        Ok(state.read.insert(*message))
    }
}
