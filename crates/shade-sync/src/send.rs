//! Building and submitting private messages
//!
//! The per-sender index is the one read-modify-write against the ledger.
//! Message accounts are init-once, so a concurrent send that claims the same
//! index fails with `AddressInUse`. The loser re-reads the counter and tries
//! the larger of the counter and the index after the one it lost, so an
//! orphaned record or a counter that never moves cannot pin a sender.

use shade_core::{Address, ShadeError, ShadeResult};
use shade_crypto::{encrypt, BoxKeypair};
use shade_ledger::{with_retry, LedgerError, LedgerWriter, SubmitMessage};
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::keys::registered_key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub address: Address,
    pub index: u64,
}

pub async fn send_message<L>(
    ledger: &L,
    ctx: &SyncContext,
    sender: &Address,
    own: &BoxKeypair,
    recipient: &Address,
    text: &str,
) -> ShadeResult<SentMessage>
where
    L: LedgerWriter + ?Sized,
{
    let sealer = ctx.sealer()?;
    let recipient_key = registered_key(ledger, ctx, recipient)
        .await?
        .ok_or_else(|| {
            ShadeError::Rejected(format!("{recipient} has no registered messaging key"))
        })?
        .x25519_pubkey;

    let content = encrypt(text, &recipient_key, own)?;
    let max = ctx.messaging.max_content_len;
    if content.ciphertext.len() > max {
        return Err(ShadeError::ContentTooLong {
            len: content.ciphertext.len(),
            max,
        });
    }
    let metadata = sealer.seal(sender, recipient);

    let attempts = ctx.messaging.send_attempts.max(1);
    let mut next = 0u64;
    for attempt in 1..=attempts {
        let counter = registered_key(ledger, ctx, sender)
            .await?
            .ok_or_else(|| ShadeError::Rejected(format!("sender {sender} is not registered")))?
            .message_count;
        let index = counter.max(next);

        let msg = SubmitMessage {
            index,
            encrypted_sender_hash: metadata.encrypted_sender_hash,
            encrypted_recipient_hash: metadata.encrypted_recipient_hash,
            content: content.ciphertext.clone(),
            content_nonce: content.nonce,
            mpc_pubkey: metadata.ephemeral_pubkey,
            mpc_nonce: metadata.nonce,
        };

        let submitted = with_retry(&ctx.retry, "submit_message", || {
            let msg = msg.clone();
            async move {
                match ledger.submit_message(sender, msg).await {
                    Err(LedgerError::AddressInUse(taken)) => Ok(Err(taken)),
                    other => other.map(Ok),
                }
            }
        })
        .await?;

        match submitted {
            Ok(address) => {
                info!(%sender, index, %address, "message submitted");
                return Ok(SentMessage { address, index });
            }
            Err(taken) => {
                warn!(%sender, index, attempt, %taken, "message index claimed concurrently");
                next = index.saturating_add(1);
            }
        }
    }

    Err(ShadeError::Rejected(format!(
        "message index still contended after {attempts} attempts"
    )))
}

/// Flag `message` as read. Only its recipient may do this; anyone else gets
/// `Unauthorized` on the first attempt.
pub async fn mark_read<L>(
    ledger: &L,
    ctx: &SyncContext,
    reader: &Address,
    message: &Address,
) -> ShadeResult<bool>
where
    L: LedgerWriter + ?Sized,
{
    let flipped = with_retry(&ctx.retry, "mark_read", || ledger.mark_read(reader, message)).await?;
    debug!(%reader, %message, flipped, "mark read");
    Ok(flipped)
}
