//! Local stand-in for the MPC cluster
//!
//! The real cluster holds its X25519 secret in shares and never reveals
//! participant hashes outside a circuit. This stand-in holds the whole key
//! so tests and local ledgers can run the same access check.

use shade_core::Address;
use shade_crypto::metadata::{cluster_shared_secret, recipient_nonce, reveal_hash, MetadataSealer};
use shade_crypto::{wallet_hash, BoxKeypair};

use crate::records::MessageRecord;

/// Wallet hashes recovered from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub sender_hash: [u8; 32],
    pub recipient_hash: [u8; 32],
}

pub struct MpcCluster {
    keypair: BoxKeypair,
}

impl MpcCluster {
    pub fn new(keypair: BoxKeypair) -> Self {
        Self { keypair }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(BoxKeypair::from_seed(seed))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_bytes()
    }

    /// Sealer clients use to address this cluster.
    pub fn sealer(&self) -> MetadataSealer {
        MetadataSealer::new(self.public_key())
    }

    pub fn reveal_participants(&self, record: &MessageRecord) -> Participants {
        let shared = cluster_shared_secret(&self.keypair, &record.mpc_pubkey);
        Participants {
            sender_hash: reveal_hash(&record.encrypted_sender_hash, &shared, record.mpc_nonce),
            recipient_hash: reveal_hash(
                &record.encrypted_recipient_hash,
                &shared,
                recipient_nonce(record.mpc_nonce),
            ),
        }
    }

    /// Whether `requester` is the record's recipient. Compares every byte.
    pub fn verify_access(&self, record: &MessageRecord, requester: &Address) -> bool {
        let recipient = self.reveal_participants(record).recipient_hash;
        let requester = wallet_hash(requester);
        recipient
            .iter()
            .zip(requester.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for MpcCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpcCluster")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_for(cluster: &MpcCluster, sender: &Address, recipient: &Address) -> MessageRecord {
        let sealed = cluster.sealer().seal(sender, recipient);
        MessageRecord {
            encrypted_sender_hash: sealed.encrypted_sender_hash,
            encrypted_recipient_hash: sealed.encrypted_recipient_hash,
            content: vec![],
            content_nonce: [0u8; 24],
            timestamp: 0,
            mpc_pubkey: sealed.ephemeral_pubkey,
            mpc_nonce: sealed.nonce,
            bump: 255,
        }
    }

    #[test]
    fn test_reveals_participants() {
        let cluster = MpcCluster::from_seed([0x42; 32]);
        let alice = Address::new([1u8; 32]);
        let bob = Address::new([2u8; 32]);
        let record = record_for(&cluster, &alice, &bob);

        let p = cluster.reveal_participants(&record);
        assert_eq!(p.sender_hash, wallet_hash(&alice));
        assert_eq!(p.recipient_hash, wallet_hash(&bob));
    }

    #[test]
    fn test_only_recipient_has_access() {
        let cluster = MpcCluster::from_seed([0x42; 32]);
        let alice = Address::new([1u8; 32]);
        let bob = Address::new([2u8; 32]);
        let record = record_for(&cluster, &alice, &bob);

        assert!(cluster.verify_access(&record, &bob));
        assert!(!cluster.verify_access(&record, &alice));
    }

    #[test]
    fn test_other_cluster_cannot_reveal() {
        let cluster = MpcCluster::from_seed([0x42; 32]);
        let impostor = MpcCluster::from_seed([0x43; 32]);
        let bob = Address::new([2u8; 32]);
        let record = record_for(&cluster, &Address::new([1u8; 32]), &bob);
        assert!(!impostor.verify_access(&record, &bob));
    }
}
