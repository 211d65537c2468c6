//! Settings shared by every client operation

use shade_core::config::{IdentityConfig, MessagingConfig, ShadeConfig};
use shade_core::{ShadeError, ShadeResult};
use shade_crypto::MetadataSealer;
use shade_ledger::{AddressScheme, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SyncContext {
    pub scheme: AddressScheme,
    pub retry: RetryPolicy,
    pub identity: IdentityConfig,
    pub messaging: MessagingConfig,
}

impl SyncContext {
    pub fn new(scheme: AddressScheme, retry: RetryPolicy) -> Self {
        Self {
            scheme,
            retry,
            identity: IdentityConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }

    pub fn from_config(config: &ShadeConfig) -> ShadeResult<Self> {
        Ok(Self {
            scheme: AddressScheme::from_config(config)?,
            retry: RetryPolicy::from_config(&config.ledger),
            identity: config.identity.clone(),
            messaging: config.messaging.clone(),
        })
    }

    pub fn with_cluster_pubkey(mut self, pubkey: [u8; 32]) -> Self {
        self.messaging.mpc_cluster_pubkey = Some(hex::encode(pubkey));
        self
    }

    /// Metadata sealer for the configured cluster.
    pub fn sealer(&self) -> ShadeResult<MetadataSealer> {
        self.messaging
            .cluster_pubkey()?
            .map(MetadataSealer::new)
            .ok_or_else(|| ShadeError::Config("messaging.mpc_cluster_pubkey is not set".into()))
    }
}
