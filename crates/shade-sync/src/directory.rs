//! Wallet to display-name directory
//!
//! Names are presentation only. A rename (including a premium purchase)
//! changes this mapping and nothing else: the wallet, its shadow key and its
//! registered messaging key are untouched. Posts carry only the author
//! wallet and are resolved to a name when they are read.

use std::collections::HashMap;

use shade_core::Address;
use shade_ledger::posts::Post;
use thiserror::Error;
use tracing::info;

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("name {0:?} is already taken")]
    NameTaken(String),
    #[error("invalid name {0:?}: use {MIN_NAME_LEN}-{MAX_NAME_LEN} letters, digits or '_'")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName {
    pub name: String,
    pub premium: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPost {
    pub author_name: String,
    pub post: Post,
}

#[derive(Debug, Default)]
pub struct NameDirectory {
    names: HashMap<Address, DisplayName>,
    /// lower-cased name → holder
    holders: HashMap<String, Address>,
}

impl NameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a regular name, replacing any previous one.
    pub fn register(&mut self, wallet: &Address, name: &str) -> Result<(), DirectoryError> {
        self.assign(wallet, name, false).map(|_| ())
    }

    /// Claim a premium name. Returns the name it replaced.
    pub fn purchase_premium(
        &mut self,
        wallet: &Address,
        name: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let previous = self.assign(wallet, name, true)?;
        info!(%wallet, name, previous = ?previous, "premium name purchased");
        Ok(previous)
    }

    pub fn lookup(&self, wallet: &Address) -> Option<&DisplayName> {
        self.names.get(wallet)
    }

    pub fn holder(&self, name: &str) -> Option<&Address> {
        self.holders.get(&name.to_lowercase())
    }

    /// Name to show for `wallet`, falling back to its short address.
    pub fn display_name(&self, wallet: &Address) -> String {
        self.names
            .get(wallet)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| wallet.short())
    }

    pub fn resolve_posts(&self, posts: &[Post]) -> Vec<ResolvedPost> {
        posts
            .iter()
            .map(|post| ResolvedPost {
                author_name: self.display_name(&post.author),
                post: post.clone(),
            })
            .collect()
    }

    fn assign(
        &mut self,
        wallet: &Address,
        name: &str,
        premium: bool,
    ) -> Result<Option<String>, DirectoryError> {
        validate_name(name)?;
        let key = name.to_lowercase();
        if let Some(holder) = self.holders.get(&key) {
            if holder != wallet {
                return Err(DirectoryError::NameTaken(name.to_string()));
            }
        }

        let previous = self.names.insert(
            *wallet,
            DisplayName {
                name: name.to_string(),
                premium,
            },
        );
        if let Some(prev) = &previous {
            self.holders.remove(&prev.name.to_lowercase());
        }
        self.holders.insert(key, *wallet);
        Ok(previous.map(|p| p.name))
    }
}

fn validate_name(name: &str) -> Result<(), DirectoryError> {
    let valid = (MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DirectoryError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_unique_case_insensitive() {
        let mut dir = NameDirectory::new();
        let a = Address::new([1u8; 32]);
        let b = Address::new([2u8; 32]);
        dir.register(&a, "whale").unwrap();
        assert_eq!(
            dir.register(&b, "WHALE"),
            Err(DirectoryError::NameTaken("WHALE".into()))
        );
        // re-registering your own name is fine
        dir.register(&a, "Whale").unwrap();
    }

    #[test]
    fn test_rename_releases_old_name() {
        let mut dir = NameDirectory::new();
        let a = Address::new([1u8; 32]);
        let b = Address::new([2u8; 32]);
        dir.register(&a, "anon123").unwrap();
        assert_eq!(
            dir.purchase_premium(&a, "CryptoWhale").unwrap(),
            Some("anon123".into())
        );
        assert!(dir.lookup(&a).unwrap().premium);
        dir.register(&b, "anon123").unwrap();
        assert_eq!(dir.holder("cryptowhale"), Some(&a));
    }

    #[test]
    fn test_invalid_names() {
        let mut dir = NameDirectory::new();
        let a = Address::new([1u8; 32]);
        assert!(dir.register(&a, "ab").is_err());
        assert!(dir.register(&a, "has space").is_err());
        assert!(dir.register(&a, &"x".repeat(33)).is_err());
    }

    #[test]
    fn test_unnamed_wallet_shows_short_address() {
        let dir = NameDirectory::new();
        let a = Address::new([1u8; 32]);
        assert_eq!(dir.display_name(&a), a.short());
    }
}
