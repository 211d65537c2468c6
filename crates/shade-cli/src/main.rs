//! shade: shadow identities and private message inspection
//!
//! Commands:
//!   config show                     - display the active configuration
//!   shadow-challenge                - print the challenge the primary wallet signs
//!   derive                          - derive shadow wallets from a primary signature
//!   address user|message|post       - compute program-derived addresses
//!   key-message <wallet>            - print the bytes a wallet signs to unlock messaging
//!   registry                        - list registered messaging identities
//!   inbox <wallet>                  - reconstruct conversations and message requests
//!   accept <wallet> <sender>        - promote a message request to a contact
//!
//! Signatures are produced by the user's wallet outside this tool and passed
//! in as hex.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

use shade_core::config::ShadeConfig;
use shade_core::{Address, Direction};
use shade_crypto::{
    derive_shadow_keypairs, hash_user_id, key_derivation_message, keypair_from_signature,
    BoxKeypair, KdfParams, SealedKey,
};
use shade_ledger::{AddressScheme, LedgerReader, RpcLedger, UserAccount};
use shade_sync::keys::{check_key_status, registered_key, KeyStatus};
use shade_sync::{reconstruct, ContactBook, Inbox, SyncContext};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "shade",
    version,
    about = "Shade shadow identity and private messaging client"
)]
struct Cli {
    /// Path to shade.toml configuration file
    #[arg(long, short = 'c', env = "SHADE_CONFIG", default_value = "shade.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "SHADE_LOG")]
    log: Option<String>,

    /// Log format
    #[arg(long, env = "SHADE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the challenge the primary wallet signs to spawn shadow wallets
    ShadowChallenge,

    /// Derive shadow wallets from the primary wallet's challenge signature
    Derive {
        /// Hex signature of the primary wallet over `shade shadow-challenge`
        #[arg(long, env = "SHADE_PRIMARY_SIGNATURE")]
        signature: String,
        /// Raw stable user identifier (hashed before use)
        #[arg(long, conflicts_with = "hashed_user_id")]
        user_id: Option<String>,
        /// Already-hashed user identifier (64 hex chars)
        #[arg(long)]
        hashed_user_id: Option<String>,
        /// Number of wallets to derive, starting at index 0
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Also print the base58 secret key of each wallet
        #[arg(long)]
        export_secret: bool,
    },

    /// Compute program-derived addresses
    Address {
        #[command(subcommand)]
        kind: AddressKind,
    },

    /// Print the message a wallet must sign to unlock its messaging key
    KeyMessage {
        wallet: Address,
    },

    /// List registered messaging identities
    Registry,

    /// Reconstruct conversations and message requests for a wallet
    Inbox {
        wallet: Address,
        /// Hex signature over `shade key-message <wallet>`
        #[arg(long, env = "SHADE_KEY_SIGNATURE", conflicts_with = "vault")]
        signature: Option<String>,
        /// Unlock with the passphrase-sealed key in the contact cache
        #[arg(long)]
        vault: bool,
        /// Seal the unlocked key into the contact cache
        #[arg(long)]
        save_key: bool,
    },

    /// Accept a message request, making the sender a contact
    Accept {
        wallet: Address,
        sender: Address,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum AddressKind {
    /// Messaging identity account of a wallet
    User { wallet: Address },
    /// Message account for a sender's index
    Message { wallet: Address, index: u64 },
    /// Post account for an author and target
    Post { wallet: Address, target: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.log.format == "json" {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    if !cli.config.exists() {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
        Commands::ShadowChallenge => cmd_shadow_challenge(&config),
        Commands::Derive {
            signature,
            user_id,
            hashed_user_id,
            count,
            export_secret,
        } => cmd_derive(&signature, user_id, hashed_user_id, count, export_secret),
        Commands::Address { kind } => cmd_address(&config, kind),
        Commands::KeyMessage { wallet } => cmd_key_message(&config, &wallet),
        Commands::Registry => cmd_registry(&config).await,
        Commands::Inbox {
            wallet,
            signature,
            vault,
            save_key,
        } => cmd_inbox(&config, &wallet, signature.as_deref(), vault, save_key).await,
        Commands::Accept { wallet, sender } => cmd_accept(&config, &wallet, &sender).await,
    }
}

fn load_config(path: &Path) -> Result<ShadeConfig> {
    if path.exists() {
        ShadeConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(ShadeConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn decode_signature(hex_sig: &str) -> Result<Vec<u8>> {
    hex::decode(hex_sig.trim().trim_start_matches("0x")).context("signature is not valid hex")
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_config_show(config: &ShadeConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn cmd_shadow_challenge(config: &ShadeConfig) -> Result<()> {
    println!("{}", config.identity.shadow_challenge);
    Ok(())
}

fn cmd_derive(
    signature: &str,
    user_id: Option<String>,
    hashed_user_id: Option<String>,
    count: u32,
    export_secret: bool,
) -> Result<()> {
    let signature = decode_signature(signature)?;
    let hashed = match (user_id, hashed_user_id) {
        (Some(raw), None) => hash_user_id(&raw),
        (None, Some(hashed)) => hashed,
        _ => bail!("pass exactly one of --user-id or --hashed-user-id"),
    };

    for wallet in derive_shadow_keypairs(&signature, &hashed, count)? {
        if export_secret {
            println!("{:>4}  {}  {}", wallet.index(), wallet.address(), wallet.to_base58_secret());
        } else {
            println!("{:>4}  {}", wallet.index(), wallet.address());
        }
    }
    Ok(())
}

fn cmd_address(config: &ShadeConfig, kind: AddressKind) -> Result<()> {
    let scheme = AddressScheme::from_config(config)?;
    let (address, bump) = match kind {
        AddressKind::User { wallet } => scheme.user_address(&wallet)?,
        AddressKind::Message { wallet, index } => scheme.message_address(&wallet, index)?,
        AddressKind::Post { wallet, target } => scheme.post_address(&wallet, &target)?,
    };
    println!("{address}  (bump {bump})");
    Ok(())
}

fn cmd_key_message(config: &ShadeConfig, wallet: &Address) -> Result<()> {
    let message = key_derivation_message(&config.identity.messaging_domain_tag, wallet);
    println!("{}", String::from_utf8_lossy(&message));
    Ok(())
}

async fn cmd_registry(config: &ShadeConfig) -> Result<()> {
    let ledger = RpcLedger::from_config(&config.ledger)?;
    let ctx = SyncContext::from_config(config)?;
    let accounts = shade_ledger::with_retry(&ctx.retry, "scan_user_accounts", || {
        ledger.scan_accounts_by_size(UserAccount::SIZE)
    })
    .await?;

    let mut skipped = 0;
    for raw in &accounts {
        match UserAccount::decode(&raw.data) {
            Ok(user) => println!(
                "{}  {}  messages={}",
                user.wallet,
                hex::encode(user.x25519_pubkey),
                user.message_count
            ),
            Err(e) => {
                tracing::debug!(address = %raw.address, error = %e, "skipping malformed user account");
                skipped += 1;
            }
        }
    }
    println!();
    println!("{} identities ({} skipped)", accounts.len() - skipped, skipped);
    Ok(())
}

async fn cmd_inbox(
    config: &ShadeConfig,
    wallet: &Address,
    signature: Option<&str>,
    vault: bool,
    save_key: bool,
) -> Result<()> {
    let ledger = RpcLedger::from_config(&config.ledger)?;
    let ctx = SyncContext::from_config(config)?;
    let mut book = ContactBook::open(&config.cache.resolved_dir(), wallet)?;

    let keypair = if vault {
        let sealed = book
            .sealed_key()
            .context("no sealed key in the contact cache; unlock with --signature first")?;
        sealed.open(&prompt_passphrase("Vault passphrase: ")?)?
    } else {
        let Some(sig) = signature else {
            bail!("pass --signature (see `shade key-message {wallet}`) or --vault");
        };
        keypair_from_signature(&decode_signature(sig)?)?
    };

    match check_key_status(&ledger, &ctx, wallet, &keypair).await? {
        KeyStatus::InSync => {}
        KeyStatus::Unregistered => {
            tracing::warn!(%wallet, "wallet has no registered messaging key; only sent copies can be read")
        }
        KeyStatus::Diverged { on_chain } => bail!(
            "derived key {} does not match registered key {}; run a key sync",
            hex::encode(keypair.public_bytes()),
            hex::encode(on_chain)
        ),
    }

    if save_key {
        seal_into(&mut book, &keypair)?;
    }

    let inbox = reconstruct(&ledger, &ctx, wallet, &keypair, &book).await?;
    print_inbox(&inbox, &book);

    let added = book.merge_recovered(&inbox);
    if added > 0 {
        tracing::info!(added, "contacts recovered from ledger");
    }
    book.flush()?;
    Ok(())
}

async fn cmd_accept(config: &ShadeConfig, wallet: &Address, sender: &Address) -> Result<()> {
    let ledger = RpcLedger::from_config(&config.ledger)?;
    let ctx = SyncContext::from_config(config)?;
    let account = registered_key(&ledger, &ctx, sender)
        .await?
        .with_context(|| format!("{sender} has no registered messaging key"))?;

    let mut book = ContactBook::open(&config.cache.resolved_dir(), wallet)?;
    book.accept_request(sender, account.x25519_pubkey);
    book.flush()?;
    println!("accepted {sender}");
    Ok(())
}

fn seal_into(book: &mut ContactBook, keypair: &BoxKeypair) -> Result<()> {
    let passphrase = prompt_passphrase("New vault passphrase: ")?;
    let sealed = SealedKey::seal(keypair, &passphrase, &KdfParams::default())?;
    book.set_sealed_key(sealed);
    Ok(())
}

fn prompt_passphrase(prompt: &str) -> Result<SecretString> {
    let pass = rpassword::prompt_password(prompt).context("reading passphrase")?;
    Ok(SecretString::from(pass))
}

fn print_inbox(inbox: &Inbox, book: &ContactBook) {
    let name = |wallet: &Address| {
        book.get(wallet)
            .and_then(|c| c.display_name.clone())
            .unwrap_or_else(|| wallet.short())
    };

    println!("Conversations ({})", inbox.conversations.len());
    for conv in &inbox.conversations {
        println!("── {} ──", name(&conv.contact));
        for msg in &conv.messages {
            let arrow = match msg.direction {
                Direction::Sent => "→",
                Direction::Received => "←",
            };
            println!("  [{}] {arrow} {}", msg.timestamp, msg.text);
        }
    }

    println!();
    println!("Message requests ({})", inbox.requests.len());
    for req in &inbox.requests {
        println!(
            "── {} ({} message{}) ──",
            name(&req.sender),
            req.message_count(),
            if req.message_count() == 1 { "" } else { "s" }
        );
        for msg in &req.messages {
            println!("  [{}] ← {}", msg.timestamp, msg.text);
        }
    }

    if inbox.skipped_records > 0 {
        println!();
        println!("{} malformed record(s) skipped", inbox.skipped_records);
    }
}
