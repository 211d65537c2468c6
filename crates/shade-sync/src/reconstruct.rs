//! Conversation reconstruction by trial decryption
//!
//! Nothing on the ledger says who a message is from or to. Recovery runs in
//! three passes:
//!
//! 1. Registry: every `UserAccount` gives a candidate (wallet, box key).
//! 2. Scan: every `MessageRecord` is tried against each candidate in order.
//!    The first candidate whose key authenticates is the counterparty; the
//!    search stops there. First match wins, not best match.
//! 3. Direction: records at one of our own message addresses were sent by us.
//!
//! Records are independent, so the scan runs in parallel across records on
//! a blocking thread while each record's candidate loop stays sequential.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use shade_core::{Address, Direction, ShadeError, ShadeResult};
use shade_crypto::{BoxKeypair, ContentSession, DirectionTag};
use shade_ledger::{
    with_retry, AddressScheme, LedgerReader, MessageRecord, RawAccount, UserAccount,
};
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::state::ContactBook;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub address: Address,
    pub counterparty: Address,
    pub direction: Direction,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub contact: Address,
    pub x25519_pubkey: [u8; 32],
    pub messages: Vec<DecodedMessage>,
}

/// Messages from a sender who is not yet a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRequest {
    pub sender: Address,
    pub x25519_pubkey: [u8; 32],
    pub messages: Vec<DecodedMessage>,
}

impl MessageRequest {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inbox {
    /// Most recent activity first
    pub conversations: Vec<Conversation>,
    pub requests: Vec<MessageRequest>,
    pub registry_size: usize,
    pub scanned_records: usize,
    /// Records that failed to parse and were skipped
    pub skipped_records: usize,
    /// Own message addresses checked for direction
    pub own_scan_bound: u64,
}

impl Inbox {
    pub fn conversation(&self, contact: &Address) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.contact == contact)
    }

    pub fn request(&self, sender: &Address) -> Option<&MessageRequest> {
        self.requests.iter().find(|r| &r.sender == sender)
    }

    pub fn message_count(&self) -> usize {
        self.conversations.iter().map(|c| c.messages.len()).sum::<usize>()
            + self.requests.iter().map(|r| r.messages.len()).sum::<usize>()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    wallet: Address,
    x25519_pubkey: [u8; 32],
}

struct Registry {
    candidates: Vec<Candidate>,
    own_counter: u64,
    skipped: usize,
}

enum ScanOutcome {
    Matched(DecodedMessage),
    NoMatch,
    Malformed,
}

/// Rebuild `owner`'s conversations from the ledger.
///
/// Safe to run concurrently with itself; results are deduplicated by record
/// address.
pub async fn reconstruct<L>(
    ledger: &L,
    ctx: &SyncContext,
    owner: &Address,
    keypair: &BoxKeypair,
    book: &ContactBook,
) -> ShadeResult<Inbox>
where
    L: LedgerReader + ?Sized,
{
    let users = with_retry(&ctx.retry, "scan_user_accounts", || {
        ledger.scan_accounts_by_size(UserAccount::SIZE)
    })
    .await?;
    let mut registry = build_registry(&users, owner, &ctx.scheme);
    for contact in book.contacts() {
        if !registry.candidates.iter().any(|c| c.wallet == contact.wallet) {
            registry.candidates.push(Candidate {
                wallet: contact.wallet,
                x25519_pubkey: contact.x25519_pubkey,
            });
        }
    }

    let records = with_retry(&ctx.retry, "scan_message_records", || {
        ledger.scan_accounts_by_size(MessageRecord::SIZE)
    })
    .await?;

    let own_scan_bound = scan_bound(
        registry.own_counter,
        ctx.messaging.max_scan,
        ctx.messaging.max_scan_ceiling,
    );

    let scheme = ctx.scheme.clone();
    let owner_wallet = *owner;
    let own = keypair.clone();
    let candidates = registry.candidates.clone();
    let (matched, scanned, malformed) = tokio::task::spawn_blocking(move || {
        let own_addresses = scheme.message_addresses(&owner_wallet, own_scan_bound)?;
        Ok::<_, ShadeError>(scan_records(&records, &candidates, &own, &own_addresses))
    })
    .await
    .map_err(|e| ShadeError::Other(anyhow::anyhow!("reconstruction task failed: {e}")))??;

    let mut inbox = classify(matched, &registry.candidates, book);
    inbox.registry_size = registry.candidates.len();
    inbox.scanned_records = scanned;
    inbox.skipped_records = registry.skipped + malformed;
    inbox.own_scan_bound = own_scan_bound;

    info!(
        %owner,
        conversations = inbox.conversations.len(),
        requests = inbox.requests.len(),
        scanned,
        skipped = inbox.skipped_records,
        "inbox reconstructed"
    );
    Ok(inbox)
}

/// Own message addresses to derive: the registered counter, never below
/// `max_scan` and never above `ceiling`.
fn scan_bound(own_counter: u64, max_scan: u64, ceiling: u64) -> u64 {
    let ceiling = ceiling.max(max_scan);
    let bound = max_scan.max(own_counter).min(ceiling);
    if own_counter > ceiling {
        warn!(
            own_counter,
            ceiling, "own message counter exceeds max_scan_ceiling, clamping direction scan"
        );
    } else if own_counter > max_scan {
        debug!(own_counter, max_scan, "widening direction scan to own counter");
    }
    bound
}

/// Accounts not stored at their wallet's user address are skipped, so a
/// forged entry can neither shadow a wallet's key nor inflate our counter.
fn build_registry(users: &[RawAccount], owner: &Address, scheme: &AddressScheme) -> Registry {
    let mut registry = Registry {
        candidates: Vec::with_capacity(users.len()),
        own_counter: 0,
        skipped: 0,
    };
    let mut seen = HashSet::new();
    for raw in users {
        let account = match UserAccount::decode(&raw.data) {
            Ok(account) => account,
            Err(e) => {
                debug!(address = %raw.address, error = %e, "skipping malformed user account");
                registry.skipped += 1;
                continue;
            }
        };
        let expected = scheme.user_address(&account.wallet).map(|(addr, _)| addr);
        if expected.as_ref().ok() != Some(&raw.address) {
            debug!(
                address = %raw.address,
                wallet = %account.wallet,
                "skipping user account outside its derived address"
            );
            registry.skipped += 1;
            continue;
        }
        if &account.wallet == owner {
            registry.own_counter = registry.own_counter.max(account.message_count);
            continue;
        }
        if seen.insert(account.wallet) {
            registry.candidates.push(Candidate {
                wallet: account.wallet,
                x25519_pubkey: account.x25519_pubkey,
            });
        }
    }
    registry
}

/// Returns (matches, records scanned, malformed records).
fn scan_records(
    records: &[RawAccount],
    candidates: &[Candidate],
    own: &BoxKeypair,
    own_addresses: &HashSet<Address>,
) -> (Vec<DecodedMessage>, usize, usize) {
    let sessions: Vec<(Address, ContentSession)> = candidates
        .iter()
        .map(|c| (c.wallet, ContentSession::new(own, &c.x25519_pubkey)))
        .collect();

    let outcomes: Vec<ScanOutcome> = records
        .par_iter()
        .map(|raw| try_record(raw, &sessions, own_addresses))
        .collect();

    let mut matched = Vec::new();
    let mut malformed = 0;
    for outcome in outcomes {
        match outcome {
            ScanOutcome::Matched(msg) => matched.push(msg),
            ScanOutcome::NoMatch => {}
            ScanOutcome::Malformed => malformed += 1,
        }
    }
    (matched, records.len(), malformed)
}

fn try_record(
    raw: &RawAccount,
    sessions: &[(Address, ContentSession)],
    own_addresses: &HashSet<Address>,
) -> ScanOutcome {
    let record = match MessageRecord::decode(&raw.data) {
        Ok(record) => record,
        Err(e) => {
            debug!(address = %raw.address, error = %e, "skipping malformed message record");
            return ScanOutcome::Malformed;
        }
    };

    for (wallet, session) in sessions {
        let Ok(content) = session.open(&record.content, &record.content_nonce) else {
            continue;
        };
        let direction = if own_addresses.contains(&raw.address)
            || content.tag == Some(DirectionTag::SenderCopy)
        {
            Direction::Sent
        } else {
            Direction::Received
        };
        return ScanOutcome::Matched(DecodedMessage {
            address: raw.address,
            counterparty: *wallet,
            direction,
            text: content.text,
            timestamp: record.timestamp,
        });
    }
    ScanOutcome::NoMatch
}

fn classify(matched: Vec<DecodedMessage>, candidates: &[Candidate], book: &ContactBook) -> Inbox {
    let mut seen = HashSet::new();
    let mut threads: BTreeMap<Address, Vec<DecodedMessage>> = BTreeMap::new();
    for msg in matched {
        if seen.insert(msg.address) {
            threads.entry(msg.counterparty).or_default().push(msg);
        }
    }

    let mut inbox = Inbox::default();
    for (counterparty, mut messages) in threads {
        messages.sort_by(|a, b| (a.timestamp, a.address).cmp(&(b.timestamp, b.address)));
        let x25519_pubkey = candidates
            .iter()
            .find(|c| c.wallet == counterparty)
            .map(|c| c.x25519_pubkey)
            .unwrap_or_default();

        let is_contact = book.is_accepted(&counterparty)
            || messages.iter().any(|m| m.direction == Direction::Sent);
        if is_contact {
            inbox.conversations.push(Conversation {
                contact: counterparty,
                x25519_pubkey,
                messages,
            });
        } else {
            inbox.requests.push(MessageRequest {
                sender: counterparty,
                x25519_pubkey,
                messages,
            });
        }
    }

    let latest = |msgs: &[DecodedMessage]| msgs.last().map(|m| m.timestamp).unwrap_or_default();
    inbox
        .conversations
        .sort_by(|a, b| latest(&b.messages).cmp(&latest(&a.messages)));
    inbox
        .requests
        .sort_by(|a, b| latest(&b.messages).cmp(&latest(&a.messages)));
    inbox
}

#[cfg(test)]
mod tests {
    use super::*;
    use shade_crypto::encrypt;

    fn raw_record(
        address: Address,
        content: Vec<u8>,
        nonce: [u8; 24],
        timestamp: i64,
    ) -> RawAccount {
        let record = MessageRecord {
            encrypted_sender_hash: [0u8; 32],
            encrypted_recipient_hash: [0u8; 32],
            content,
            content_nonce: nonce,
            timestamp,
            mpc_pubkey: [0u8; 32],
            mpc_nonce: 0,
            bump: 255,
        };
        RawAccount {
            address,
            data: record.encode(),
        }
    }

    fn candidate(wallet: u8, kp: &BoxKeypair) -> Candidate {
        Candidate {
            wallet: Address::new([wallet; 32]),
            x25519_pubkey: kp.public_bytes(),
        }
    }

    #[test]
    fn test_first_matching_candidate_wins() {
        let me = BoxKeypair::from_seed([1u8; 32]);
        let carol = BoxKeypair::from_seed([3u8; 32]);
        let sealed = encrypt("hi", &me.public_bytes(), &carol).unwrap();
        let rec = raw_record(Address::new([0xEE; 32]), sealed.ciphertext, sealed.nonce, 10);

        // carol listed twice under different wallets: the earlier entry wins
        let candidates = vec![candidate(0xC0, &carol), candidate(0xC1, &carol)];
        let (matched, scanned, malformed) =
            scan_records(&[rec], &candidates, &me, &HashSet::new());
        assert_eq!((scanned, malformed), (1, 0));
        assert_eq!(matched[0].counterparty, Address::new([0xC0; 32]));
        assert_eq!(matched[0].direction, Direction::Received);
    }

    #[test]
    fn test_own_address_means_sent() {
        let me = BoxKeypair::from_seed([1u8; 32]);
        let bob = BoxKeypair::from_seed([2u8; 32]);
        let sealed = encrypt("to bob", &bob.public_bytes(), &me).unwrap();
        let addr = Address::new([0xAB; 32]);
        let rec = raw_record(addr, sealed.ciphertext, sealed.nonce, 10);

        let own: HashSet<Address> = [addr].into_iter().collect();
        let (matched, _, _) = scan_records(&[rec], &[candidate(2, &bob)], &me, &own);
        assert_eq!(matched[0].direction, Direction::Sent);
        assert_eq!(matched[0].text, "to bob");
    }

    #[test]
    fn test_sender_copy_tag_means_sent() {
        let me = BoxKeypair::from_seed([1u8; 32]);
        let bob = BoxKeypair::from_seed([2u8; 32]);
        let sealed = ContentSession::new(&me, &bob.public_bytes())
            .seal("archived", DirectionTag::SenderCopy)
            .unwrap();
        let rec = raw_record(Address::new([0xAC; 32]), sealed.ciphertext, sealed.nonce, 10);

        let (matched, _, _) = scan_records(&[rec], &[candidate(2, &bob)], &me, &HashSet::new());
        assert_eq!(matched[0].direction, Direction::Sent);
    }

    #[test]
    fn test_unrelated_and_corrupt_records() {
        let me = BoxKeypair::from_seed([1u8; 32]);
        let bob = BoxKeypair::from_seed([2u8; 32]);
        let carol = BoxKeypair::from_seed([3u8; 32]);
        let sealed = encrypt("not for me", &carol.public_bytes(), &bob).unwrap();
        let unrelated = raw_record(Address::new([1; 32]), sealed.ciphertext, sealed.nonce, 10);
        let corrupt = RawAccount {
            address: Address::new([2; 32]),
            data: vec![0u8; MessageRecord::SIZE],
        };

        let (matched, scanned, malformed) =
            scan_records(&[unrelated, corrupt], &[candidate(2, &bob)], &me, &HashSet::new());
        assert!(matched.is_empty());
        assert_eq!((scanned, malformed), (2, 1));
    }

    fn scheme() -> AddressScheme {
        AddressScheme::new(
            Address::new([0x11; 32]),
            &shade_core::config::SeedConfig::default(),
        )
    }

    fn user_at(address: Address, wallet: Address, count: u64) -> RawAccount {
        RawAccount {
            address,
            data: UserAccount {
                wallet,
                x25519_pubkey: [5u8; 32],
                message_count: count,
                bump: 255,
            }
            .encode(),
        }
    }

    fn registered(scheme: &AddressScheme, wallet: Address, count: u64) -> RawAccount {
        let (address, _) = scheme.user_address(&wallet).unwrap();
        user_at(address, wallet, count)
    }

    #[test]
    fn test_registry_excludes_owner_and_reads_counter() {
        let scheme = scheme();
        let owner = Address::new([1u8; 32]);
        let users = vec![
            registered(&scheme, owner, 1500),
            registered(&scheme, Address::new([2u8; 32]), 3),
            RawAccount {
                address: Address::new([9u8; 32]),
                data: vec![1u8; UserAccount::SIZE],
            },
        ];
        let registry = build_registry(&users, &owner, &scheme);
        assert_eq!(registry.own_counter, 1500);
        assert_eq!(registry.candidates.len(), 1);
        assert_eq!(registry.skipped, 1);
    }

    #[test]
    fn test_registry_skips_accounts_outside_user_address() {
        let scheme = scheme();
        let owner = Address::new([1u8; 32]);
        let bob = Address::new([2u8; 32]);
        let users = vec![
            // forged entries listed first so they would win a first-seen race
            user_at(Address::new([0x77; 32]), owner, 100_000),
            user_at(Address::new([0x78; 32]), bob, 0),
            registered(&scheme, owner, 4),
            registered(&scheme, bob, 0),
        ];
        let registry = build_registry(&users, &owner, &scheme);
        assert_eq!(registry.own_counter, 4);
        assert_eq!(registry.skipped, 2);
        assert_eq!(registry.candidates.len(), 1);
        assert_eq!(registry.candidates[0].wallet, bob);
    }

    #[test]
    fn test_scan_bound_is_clamped() {
        assert_eq!(scan_bound(0, 1000, 100_000), 1000);
        assert_eq!(scan_bound(1500, 1000, 100_000), 1500);
        assert_eq!(scan_bound(u64::MAX, 1000, 100_000), 100_000);
        // a ceiling below max_scan never narrows the base scan
        assert_eq!(scan_bound(5000, 1000, 10), 1000);
    }
}
