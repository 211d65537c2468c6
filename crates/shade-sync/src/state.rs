//! Client-local contact book, one JSON file per owner wallet.
//!
//! Never authoritative: anything here can be rebuilt by reconstructing the
//! inbox from the ledger and merging it back with `merge_recovered`.
//! Writes go to a temp file which is then renamed over the original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shade_core::{Address, ShadeResult};
use shade_crypto::SealedKey;
use tracing::{debug, warn};

use crate::reconstruct::Inbox;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub wallet: Address,
    pub x25519_pubkey: [u8; 32],
    #[serde(default)]
    pub display_name: Option<String>,
    /// Promoted from message request by the owner
    #[serde(default)]
    pub accepted: bool,
    /// Timestamp of the newest message seen with this contact
    #[serde(default)]
    pub last_seen: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookFile {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    sealed_key: Option<SealedKey>,
}

pub struct ContactBook {
    path: PathBuf,
    owner: Address,
    contacts: BTreeMap<Address, Contact>,
    sealed_key: Option<SealedKey>,
    dirty: bool,
}

impl ContactBook {
    /// Load `<dir>/<owner>.json`, or start empty if it does not exist.
    pub fn open(dir: &Path, owner: &Address) -> ShadeResult<Self> {
        let path = dir.join(format!("{}.json", owner.to_base58()));
        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading contact book: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing contact book: {}", path.display()))?
        } else {
            BookFile::default()
        };

        Ok(Self {
            path,
            owner: *owner,
            contacts: file.contacts.into_iter().map(|c| (c.wallet, c)).collect(),
            sealed_key: file.sealed_key,
            dirty: false,
        })
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn get(&self, wallet: &Address) -> Option<&Contact> {
        self.contacts.get(wallet)
    }

    pub fn is_accepted(&self, wallet: &Address) -> bool {
        self.contacts.get(wallet).is_some_and(|c| c.accepted)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Promote a message-request sender to contact.
    pub fn accept_request(&mut self, wallet: &Address, x25519_pubkey: [u8; 32]) {
        let contact = self.contacts.entry(*wallet).or_insert_with(|| Contact {
            wallet: *wallet,
            x25519_pubkey,
            display_name: None,
            accepted: false,
            last_seen: 0,
        });
        contact.x25519_pubkey = x25519_pubkey;
        contact.accepted = true;
        self.dirty = true;
        debug!(%wallet, "message request accepted");
    }

    pub fn set_display_name(&mut self, wallet: &Address, name: impl Into<String>) -> bool {
        match self.contacts.get_mut(wallet) {
            Some(contact) => {
                contact.display_name = Some(name.into());
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Fold a freshly reconstructed inbox into the cache. Every
    /// conversation counterparty becomes an accepted contact; requests stay
    /// requests. Returns the number of contacts added.
    pub fn merge_recovered(&mut self, inbox: &Inbox) -> usize {
        let mut added = 0;
        for conv in &inbox.conversations {
            let newest = conv.messages.last().map(|m| m.timestamp).unwrap_or_default();
            match self.contacts.get_mut(&conv.contact) {
                Some(contact) => {
                    // a rotated registry key replaces the cached one
                    if conv.x25519_pubkey != [0u8; 32] {
                        contact.x25519_pubkey = conv.x25519_pubkey;
                    }
                    contact.accepted = true;
                    contact.last_seen = contact.last_seen.max(newest);
                }
                None => {
                    self.contacts.insert(
                        conv.contact,
                        Contact {
                            wallet: conv.contact,
                            x25519_pubkey: conv.x25519_pubkey,
                            display_name: None,
                            accepted: true,
                            last_seen: newest,
                        },
                    );
                    added += 1;
                }
            }
            self.dirty = true;
        }
        added
    }

    pub fn sealed_key(&self) -> Option<&SealedKey> {
        self.sealed_key.as_ref()
    }

    pub fn set_sealed_key(&mut self, key: SealedKey) {
        self.sealed_key = Some(key);
        self.dirty = true;
    }

    pub fn flush(&mut self) -> ShadeResult<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating contact dir: {}", parent.display()))?;
        }

        let file = BookFile {
            contacts: self.contacts.values().cloned().collect(),
            sealed_key: self.sealed_key.clone(),
        };
        let json = serde_json::to_string_pretty(&file).context("serializing contact book")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing contact book temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming contact book: {}", self.path.display()))?;

        self.dirty = false;
        Ok(())
    }
}

impl Drop for ContactBook {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("failed to flush contact book on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::{Conversation, DecodedMessage};
    use shade_core::Direction;

    fn conversation(contact: Address, ts: i64) -> Conversation {
        Conversation {
            contact,
            x25519_pubkey: [4u8; 32],
            messages: vec![DecodedMessage {
                address: Address::new([9u8; 32]),
                counterparty: contact,
                direction: Direction::Sent,
                text: "hey".into(),
                timestamp: ts,
            }],
        }
    }

    #[test]
    fn test_empty_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let book = ContactBook::open(tmp.path(), &Address::new([1u8; 32])).unwrap();
        assert!(book.is_empty());
    }

    #[test]
    fn test_accept_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let owner = Address::new([1u8; 32]);
        let alice = Address::new([2u8; 32]);
        {
            let mut book = ContactBook::open(tmp.path(), &owner).unwrap();
            book.accept_request(&alice, [7u8; 32]);
            book.flush().unwrap();
        }
        let book = ContactBook::open(tmp.path(), &owner).unwrap();
        assert!(book.is_accepted(&alice));
        assert_eq!(book.get(&alice).unwrap().x25519_pubkey, [7u8; 32]);
    }

    #[test]
    fn test_flush_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let owner = Address::new([1u8; 32]);
        {
            let mut book = ContactBook::open(tmp.path(), &owner).unwrap();
            book.accept_request(&Address::new([2u8; 32]), [7u8; 32]);
        }
        assert_eq!(ContactBook::open(tmp.path(), &owner).unwrap().len(), 1);
    }

    #[test]
    fn test_books_are_per_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let mut a = ContactBook::open(tmp.path(), &Address::new([1u8; 32])).unwrap();
        a.accept_request(&Address::new([5u8; 32]), [7u8; 32]);
        a.flush().unwrap();
        let b = ContactBook::open(tmp.path(), &Address::new([2u8; 32])).unwrap();
        assert!(b.is_empty());
    }

    #[test]
    fn test_merge_recovered() {
        let tmp = tempfile::tempdir().unwrap();
        let mut book = ContactBook::open(tmp.path(), &Address::new([1u8; 32])).unwrap();
        let bob = Address::new([3u8; 32]);
        let inbox = Inbox {
            conversations: vec![conversation(bob, 50)],
            ..Inbox::default()
        };

        assert_eq!(book.merge_recovered(&inbox), 1);
        assert_eq!(book.merge_recovered(&inbox), 0);
        let contact = book.get(&bob).unwrap();
        assert!(contact.accepted);
        assert_eq!(contact.last_seen, 50);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let owner = Address::new([1u8; 32]);
        let path = tmp.path().join(format!("{}.json", owner.to_base58()));
        std::fs::write(path, "{not json").unwrap();
        assert!(ContactBook::open(tmp.path(), &owner).is_err());
    }
}
