//! `fieldvault` CLI tool for key management and field encryption.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use fieldvault::algorithm::Algorithm;
use fieldvault::config::EncryptionConfig;
use fieldvault::key_vault::DEFAULT_KEY_VAULT_NAMESPACE;
use fieldvault::service::{EncryptionService, EncryptionState};
use fieldvault::value::EncryptedValue;
use fieldvault_key_file::{FileKeyVault, FileMasterKey};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fieldvault")]
#[command(about = "fieldvault key management and field encryption CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new master key file
    Keygen {
        /// Path of the key file to create
        #[arg(short, long, default_value = "master.key")]
        output: PathBuf,
    },
    /// Create the data key if the vault is empty and print its id
    Init {
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Encrypt a value and print it base64-encoded
    Encrypt {
        #[command(flatten)]
        keys: KeyArgs,
        /// `deterministic`, `random` or a full algorithm name
        #[arg(short, long, default_value_t = Algorithm::Deterministic)]
        algorithm: Algorithm,
        /// Plaintext value
        value: String,
    },
    /// Decrypt a base64-encoded value
    Decrypt {
        #[command(flatten)]
        keys: KeyArgs,
        /// Encrypted value
        value: String,
    },
    /// Validate a configuration file and list its encrypted fields
    Schema {
        /// JSON configuration file
        config: PathBuf,
        /// Only list fields of this `database.collection`
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[derive(Args)]
struct KeyArgs {
    /// Master key file; created on first use
    #[arg(short, long, default_value = "master.key")]
    master_key: PathBuf,
    /// Key vault root directory
    #[arg(short, long, default_value = "vault")]
    vault: PathBuf,
    /// Key vault namespace (`database.collection`)
    #[arg(long, default_value = DEFAULT_KEY_VAULT_NAMESPACE)]
    namespace: String,
}

impl KeyArgs {
    async fn start(&self) -> Result<EncryptionService> {
        debug!(master_key = %self.master_key.display(), vault = %self.vault.display(), "starting");
        let config = EncryptionConfig::default().with_key_vault_namespace(&self.namespace)?;
        let vault = FileKeyVault::open(&self.vault, config.key_vault_namespace())
            .await
            .with_context(|| format!("opening key vault in {}", self.vault.display()))?;

        let service = EncryptionService::new(config);
        match service.initialize(&FileMasterKey::new(&self.master_key), vault).await {
            EncryptionState::Ready(_) => Ok(service),
            EncryptionState::Failed(cause) => Err(anyhow!("encryption unavailable: {cause}")),
            state => Err(anyhow!("unexpected encryption state: {state:?}")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { output } => {
            FileMasterKey::generate(&output)?;
            println!("Master key written to {}", output.display());
        }
        Commands::Init { keys } => {
            let service = keys.start().await?;
            let key_id = service.data_key_id().context("data key id missing")?;
            println!("Data key: {key_id}");
        }
        Commands::Encrypt { keys, algorithm, value } => {
            let service = keys.start().await?;
            println!("{}", service.encrypt_field(&value, algorithm)?.to_base64());
        }
        Commands::Decrypt { keys, value } => {
            let service = keys.start().await?;
            let value = EncryptedValue::from_base64(&value)?;
            println!("{}", service.decrypt_field(&value)?);
        }
        Commands::Schema { config, namespace } => {
            let config = EncryptionConfig::from_path(&config)?;
            println!("Key vault: {}", config.key_vault_namespace());

            let schema = config.schema_map();
            for ns in schema.namespaces() {
                if namespace.as_deref().is_some_and(|wanted| wanted != ns) {
                    continue;
                }
                for field in schema.encrypted_fields(ns) {
                    let queryable = if field.algorithm.supports_equality() { "yes" } else { "no" };
                    println!(
                        "{ns}  {}  {}  equality: {queryable}",
                        field.field_path, field.algorithm
                    );
                }
            }
        }
    }

    Ok(())
}
