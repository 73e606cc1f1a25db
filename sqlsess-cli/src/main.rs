//! sqlsess CLI - operator commands for the session table
//!
//! Creates the table, purges expired rows, mints key pairs and inspects cookies.

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::RngCore;
use sqlsess_core::{
    format_expire_on, init_logging, log_operation_error, log_operation_start,
    log_operation_success, performance, KeyPair, LoggingConfig, StoreConfig, MIN_BLOCK_KEY_BYTES,
};
use sqlsess_store::{LoadOutcome, SqlSessionStore, SqliteRecordStore};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_CONFIG_FILE: &str = "sqlsess.toml";
const MIN_KEY_BYTES: usize = 16;

#[derive(Parser)]
#[command(name = "sqlsess")]
#[command(about = "Maintain a SQL-backed session store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the session table if it does not exist
    Init,

    /// Delete rows whose expiry has passed
    Purge,

    /// Print a random key pair as a `[[keys]]` entry
    Keygen {
        /// Hash key length in bytes
        #[arg(short, long, default_value = "32")]
        bytes: usize,

        /// Omit the block key so values are signed but not encrypted
        #[arg(long)]
        sign_only: bool,
    },

    /// Decode a session cookie and check whether its row would load
    Inspect {
        /// Cookie value as sent by the browser
        cookie: String,

        /// Cookie name the value was sealed under (defaults to session_name)
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let logging_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        config.logging.clone()
    };
    init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting sqlsess v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init => handle_init(&config).await?,
        Commands::Purge => handle_purge(&config).await?,
        Commands::Keygen { bytes, sign_only } => println!("{}", handle_keygen(bytes, sign_only)?),
        Commands::Inspect { cookie, name } => handle_inspect(&config, &cookie, name).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StoreConfig> {
    if let Some(path) = path {
        return StoreConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return StoreConfig::from_file(default_path)
            .with_context(|| format!("Failed to load configuration from {:?}", default_path));
    }

    Ok(StoreConfig::default())
}

async fn handle_init(config: &StoreConfig) -> anyhow::Result<()> {
    log_operation_start!("init", database_url = %config.database_url);

    let store = SqlSessionStore::connect(config).await.map_err(|e| {
        log_operation_error!("init", e, database_url = %config.database_url);
        e
    })?;
    store.close().await;

    log_operation_success!("init", table = %config.table_name);
    println!(
        "Session table '{}' ready in {}",
        config.table_name, config.database_url
    );
    Ok(())
}

async fn handle_purge(config: &StoreConfig) -> anyhow::Result<()> {
    log_operation_start!("purge", table = %config.table_name);

    let records = SqliteRecordStore::connect(&config.database_url, &config.table_name)
        .await
        .context("Failed to open the session table")?;
    let cutoff = format_expire_on(Utc::now());
    let purged = performance::measure_async("purge_expired", records.purge_expired(&cutoff))
        .await
        .map_err(|e| {
            log_operation_error!("purge", e, cutoff = %cutoff);
            e
        })?;
    let remaining = records.count_rows().await?;
    records.pool().close().await;

    log_operation_success!("purge", purged = purged, remaining = remaining);
    println!("Purged {} expired session(s), {} remaining", purged, remaining);
    Ok(())
}

fn random_key(bytes: usize) -> String {
    let mut key = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut key);
    BASE64.encode(&key)
}

/// Render a fresh key pair as a TOML `[[keys]]` entry
fn handle_keygen(bytes: usize, sign_only: bool) -> anyhow::Result<String> {
    if bytes < MIN_KEY_BYTES {
        bail!("Keys shorter than {} bytes are not accepted", MIN_KEY_BYTES);
    }

    let pair = if sign_only {
        KeyPair::signing(random_key(bytes))
    } else {
        KeyPair::encrypting(random_key(bytes), random_key(MIN_BLOCK_KEY_BYTES))
    };

    #[derive(serde::Serialize)]
    struct Entry {
        keys: Vec<KeyPair>,
    }
    let entry = toml::to_string(&Entry { keys: vec![pair] })
        .context("Failed to render key pair")?;
    Ok(entry.trim_end().to_string())
}

async fn handle_inspect(
    config: &StoreConfig,
    cookie: &str,
    name: Option<String>,
) -> anyhow::Result<()> {
    let name = name.unwrap_or_else(|| config.session_name.clone());
    log_operation_start!("inspect", name = %name);

    let store = SqlSessionStore::connect(config).await?;
    let lifecycle = store.lifecycle();

    let id = match lifecycle.decode_cookie(&name, cookie) {
        Ok(id) => id,
        Err(e) => {
            log_operation_error!("inspect", e, name = %name);
            println!("Cookie does not verify under '{}': {}", name, e);
            store.close().await;
            return Ok(());
        }
    };
    println!("Session id: {}", id);

    match lifecycle.load_outcome(&name, &id).await {
        LoadOutcome::Loaded(loaded) => {
            println!("Expires:    {}", format_expire_on(loaded.expires_at));
            println!("Values:     {} key(s)", loaded.values.len());
            println!("Status:     loads");
        }
        LoadOutcome::Absent(reason) => {
            println!("Status:     would start a new session ({})", reason);
        }
    }

    store.close().await;
    log_operation_success!("inspect", session_id = %id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["sqlsess", "--verbose", "keygen", "--bytes", "48"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Keygen {
                bytes: 48,
                sign_only: false
            }
        ));

        let cli = Cli::try_parse_from(["sqlsess", "-c", "store.toml", "inspect", "abc", "-n", "sid"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("store.toml")));
        match cli.command {
            Commands::Inspect { cookie, name } => {
                assert_eq!(cookie, "abc");
                assert_eq!(name.as_deref(), Some("sid"));
            }
            _ => panic!("expected inspect"),
        }
    }

    #[test]
    fn test_keygen_rejects_short_keys() {
        assert!(handle_keygen(8, false).is_err());
        assert!(handle_keygen(32, false).is_ok());
    }

    #[test]
    fn test_keygen_output_loads_as_config() {
        let entry = handle_keygen(32, false).unwrap();
        assert!(entry.starts_with("[[keys]]"));
        let config: StoreConfig = toml::from_str(&entry).unwrap();
        let material = config.key_material().unwrap();
        assert_eq!(material[0].hash_key.len(), 32);
        assert_eq!(material[0].block_key.as_ref().map(Vec::len), Some(MIN_BLOCK_KEY_BYTES));

        let signing: StoreConfig = toml::from_str(&handle_keygen(32, true).unwrap()).unwrap();
        assert!(signing.keys[0].block_key.is_none());
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/sqlsess.toml"))).is_err());
    }
}
