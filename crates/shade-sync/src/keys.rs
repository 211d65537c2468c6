//! Messaging key lifecycle: derive, verify against the ledger, rotate
//!
//! The wallet collaborator signs exactly once per derivation. Signing is
//! interactive, so it is raced against a cancellation token: closing the
//! prompt surfaces `SigningCancelled` instead of hanging the caller.

use async_trait::async_trait;
use shade_core::{Address, ShadeError, ShadeResult};
use shade_crypto::{
    key_derivation_message, keypair_from_signature, matches_on_chain, BoxKeypair, ShadowKeypair,
};
use shade_ledger::{with_retry, LedgerError, LedgerReader, LedgerWriter, UserAccount};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::SyncContext;

/// A wallet able to sign arbitrary messages.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    fn wallet(&self) -> Address;

    async fn sign_message(&self, message: &[u8]) -> ShadeResult<Vec<u8>>;
}

/// Signs locally with a derived shadow wallet.
pub struct KeypairSigner {
    keypair: ShadowKeypair,
}

impl KeypairSigner {
    pub fn new(keypair: ShadowKeypair) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl MessageSigner for KeypairSigner {
    fn wallet(&self) -> Address {
        self.keypair.address()
    }

    async fn sign_message(&self, message: &[u8]) -> ShadeResult<Vec<u8>> {
        Ok(self.keypair.sign(message).to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Unregistered,
    InSync,
    Diverged { on_chain: [u8; 32] },
}

pub async fn derive_messaging_keypair(
    signer: &dyn MessageSigner,
    domain_tag: &str,
    cancel: &CancellationToken,
) -> ShadeResult<BoxKeypair> {
    let message = key_derivation_message(domain_tag, &signer.wallet());
    let signature = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ShadeError::SigningCancelled),
        sig = signer.sign_message(&message) => sig?,
    };
    keypair_from_signature(&signature)
}

/// Registered key of `wallet`, if any.
pub async fn registered_key<L>(
    ledger: &L,
    ctx: &SyncContext,
    wallet: &Address,
) -> ShadeResult<Option<UserAccount>>
where
    L: LedgerReader + ?Sized,
{
    let (address, _) = ctx.scheme.user_address(wallet)?;
    let data = with_retry(&ctx.retry, "get_user_account", || ledger.get_account(&address)).await?;
    match data {
        Some(bytes) => Ok(Some(UserAccount::decode(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn check_key_status<L>(
    ledger: &L,
    ctx: &SyncContext,
    wallet: &Address,
    derived: &BoxKeypair,
) -> ShadeResult<KeyStatus>
where
    L: LedgerReader + ?Sized,
{
    let status = match registered_key(ledger, ctx, wallet).await? {
        None => KeyStatus::Unregistered,
        Some(account) if matches_on_chain(&derived.public_bytes(), &account.x25519_pubkey) => {
            KeyStatus::InSync
        }
        Some(account) => KeyStatus::Diverged {
            on_chain: account.x25519_pubkey,
        },
    };
    Ok(status)
}

/// Derive this session's messaging keypair, registering it on first use.
///
/// A registered key that differs from the derived one is reported as
/// `KeyMismatch` and left alone; only `sync_keys` overwrites it.
pub async fn unlock<L>(
    ledger: &L,
    ctx: &SyncContext,
    signer: &dyn MessageSigner,
    cancel: &CancellationToken,
) -> ShadeResult<BoxKeypair>
where
    L: LedgerWriter + ?Sized,
{
    let wallet = signer.wallet();
    let keypair =
        derive_messaging_keypair(signer, &ctx.identity.messaging_domain_tag, cancel).await?;

    match check_key_status(ledger, ctx, &wallet, &keypair).await? {
        KeyStatus::InSync => Ok(keypair),
        KeyStatus::Unregistered => {
            register(ledger, ctx, &wallet, &keypair).await?;
            Ok(keypair)
        }
        KeyStatus::Diverged { .. } => {
            warn!(%wallet, "derived messaging key differs from registered key");
            Err(ShadeError::KeyMismatch {
                wallet: wallet.to_base58(),
            })
        }
    }
}

/// Re-derive under `new_domain_tag` and overwrite the registration.
///
/// Messages encrypted to the previous key stay readable only with that key.
pub async fn sync_keys<L>(
    ledger: &L,
    ctx: &SyncContext,
    signer: &dyn MessageSigner,
    new_domain_tag: &str,
    cancel: &CancellationToken,
) -> ShadeResult<BoxKeypair>
where
    L: LedgerWriter + ?Sized,
{
    let wallet = signer.wallet();
    let keypair = derive_messaging_keypair(signer, new_domain_tag, cancel).await?;

    match check_key_status(ledger, ctx, &wallet, &keypair).await? {
        KeyStatus::InSync => {}
        KeyStatus::Unregistered => register(ledger, ctx, &wallet, &keypair).await?,
        KeyStatus::Diverged { .. } => {
            let public = keypair.public_bytes();
            with_retry(&ctx.retry, "update_identity_key", || {
                ledger.update_identity_key(&wallet, public)
            })
            .await?;
            info!(%wallet, domain_tag = new_domain_tag, "messaging key rotated");
        }
    }
    Ok(keypair)
}

async fn register<L>(
    ledger: &L,
    ctx: &SyncContext,
    wallet: &Address,
    keypair: &BoxKeypair,
) -> ShadeResult<()>
where
    L: LedgerWriter + ?Sized,
{
    let public = keypair.public_bytes();
    let registered = with_retry(&ctx.retry, "register_identity", move || async move {
        match ledger.register_identity(wallet, public).await {
            Err(LedgerError::AddressInUse(_)) => Ok(false),
            other => other.map(|_| true),
        }
    })
    .await?;

    if registered {
        info!(%wallet, "messaging identity registered");
        return Ok(());
    }

    // lost a race with another session of the same wallet
    match check_key_status(ledger, ctx, wallet, keypair).await? {
        KeyStatus::InSync => Ok(()),
        _ => Err(ShadeError::KeyMismatch {
            wallet: wallet.to_base58(),
        }),
    }
}
