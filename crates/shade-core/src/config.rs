use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ShadeError, ShadeResult};
use crate::types::Address;

/// Top-level client configuration (loaded from shade.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadeConfig {
    pub ledger: LedgerConfig,
    pub identity: IdentityConfig,
    pub messaging: MessagingConfig,
    pub seeds: SeedConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the ledger node
    pub rpc_url: String,
    /// Base58 id of the messaging program (owner of every derived address)
    pub program_id: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Retry limit for transient RPC failures
    pub max_retries: u32,
    /// First backoff delay in milliseconds (doubles per attempt)
    pub base_backoff_ms: u64,
    /// Upper bound on a single backoff delay
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed challenge the primary wallet signs to spawn shadow wallets
    pub shadow_challenge: String,
    /// Versioned prefix of the messaging key derivation message.
    /// Changing it invalidates every previously derived messaging key.
    pub messaging_domain_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Own message addresses checked during direction resolution
    pub max_scan: u64,
    /// Hard cap on the direction scan when the own counter exceeds `max_scan`
    pub max_scan_ceiling: u64,
    /// Maximum ciphertext length accepted by the ledger
    pub max_content_len: usize,
    /// Hex-encoded X25519 public key of the MPC cluster
    pub mpc_cluster_pubkey: Option<String>,
    /// Attempts when a concurrent send claims the same message index
    pub send_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub user: String,
    pub message: String,
    pub post: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one contact file per owner wallet
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".into(),
            program_id: "A8r4vLoD79gtdwvyHBY7bXzRSXjFNBbuXic9cPHUJa2s".into(),
            request_timeout_secs: 30,
            max_retries: 4,
            base_backoff_ms: 250,
            max_backoff_ms: 8_000,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            shadow_challenge: "Sign this message to access your Shade shadow wallets".into(),
            messaging_domain_tag: "shade-messaging-key-v1:".into(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_scan: 1000,
            max_scan_ceiling: 100_000,
            max_content_len: 256,
            mpc_cluster_pubkey: None,
            send_attempts: 3,
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            user: "user".into(),
            message: "message".into(),
            post: "post".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/shade/contacts"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ShadeConfig {
    pub fn from_toml_str(s: &str) -> ShadeResult<Self> {
        toml::from_str(s).map_err(|e| ShadeError::Config(e.to_string()))
    }

    /// Read and parse a config file. Missing files are an error here;
    /// callers that want defaults check existence first.
    pub fn load(path: &Path) -> ShadeResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> ShadeResult<String> {
        toml::to_string_pretty(self).map_err(|e| ShadeError::Config(e.to_string()))
    }
}

impl LedgerConfig {
    pub fn program_address(&self) -> ShadeResult<Address> {
        self.program_id
            .parse()
            .map_err(|e| ShadeError::Config(format!("ledger.program_id: {e}")))
    }
}

impl MessagingConfig {
    /// Decoded cluster key, if one is configured.
    pub fn cluster_pubkey(&self) -> ShadeResult<Option<[u8; 32]>> {
        let Some(hex_key) = self.mpc_cluster_pubkey.as_deref() else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| ShadeError::Config(format!("messaging.mpc_cluster_pubkey: {e}")))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ShadeError::Config(format!(
                "messaging.mpc_cluster_pubkey: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Some(key))
    }
}

impl CacheConfig {
    /// `dir` with a leading `~` replaced by `$HOME`.
    pub fn resolved_dir(&self) -> PathBuf {
        expand_home(&self.dir)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[ledger]
rpc_url = "http://127.0.0.1:8899"
program_id = "11111111111111111111111111111111"
request_timeout_secs = 5
max_retries = 2

[identity]
shadow_challenge = "Sign in to Shade devnet"
messaging_domain_tag = "shade-messaging-key-v2:"

[messaging]
max_scan = 5000
mpc_cluster_pubkey = "0909090909090909090909090909090909090909090909090909090909090909"
send_attempts = 5

[seeds]
message = "private_message"

[cache]
dir = "/var/lib/shade"

[log]
level = "debug"
format = "json"
"#;
        let config = ShadeConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.ledger.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.ledger.max_retries, 2);
        assert_eq!(config.ledger.program_address().unwrap(), Address::new([0u8; 32]));
        assert_eq!(config.identity.shadow_challenge, "Sign in to Shade devnet");
        assert_eq!(config.identity.messaging_domain_tag, "shade-messaging-key-v2:");
        assert_eq!(config.messaging.max_scan, 5000);
        assert_eq!(config.messaging.cluster_pubkey().unwrap(), Some([9u8; 32]));
        assert_eq!(config.seeds.message, "private_message");
        assert_eq!(config.seeds.user, "user");
        assert_eq!(config.cache.dir, PathBuf::from("/var/lib/shade"));
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = ShadeConfig::from_toml_str("").unwrap();

        assert_eq!(config.messaging.max_scan, 1000);
        assert_eq!(config.messaging.max_scan_ceiling, 100_000);
        assert_eq!(config.messaging.max_content_len, 256);
        assert_eq!(config.messaging.cluster_pubkey().unwrap(), None);
        assert_eq!(config.seeds.message, "message");
        assert_eq!(config.log.level, "info");
        assert!(config.ledger.program_address().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[messaging]
max_scan = 20
"#;
        let config = ShadeConfig::from_toml_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.messaging.max_scan, 20);
        // Defaults
        assert_eq!(config.messaging.send_attempts, 3);
        assert_eq!(config.ledger.base_backoff_ms, 250);
    }

    #[test]
    fn test_bad_cluster_key_is_config_error() {
        let toml_str = r#"
[messaging]
mpc_cluster_pubkey = "abcd"
"#;
        let config = ShadeConfig::from_toml_str(toml_str).unwrap();
        assert!(matches!(
            config.messaging.cluster_pubkey(),
            Err(ShadeError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ShadeConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed = ShadeConfig::from_toml_str(&toml_str).unwrap();

        assert_eq!(config.ledger.rpc_url, parsed.ledger.rpc_url);
        assert_eq!(
            config.identity.messaging_domain_tag,
            parsed.identity.messaging_domain_tag
        );
        assert_eq!(config.cache.dir, parsed.cache.dir);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shade.toml");
        std::fs::write(&path, "[log]\nlevel = \"warn\"\n").unwrap();
        let config = ShadeConfig::load(&path).unwrap();
        assert_eq!(config.log.level, "warn");
    }
}
