use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use juststore::config::{self, StoreConfig, CONFIG_FILE, STORE_DIR};
use juststore::error::RetryPolicy;
use juststore::path::split_key;
use juststore::storage;
use juststore::sync::remote::{self, PeerBridge};
use juststore::sync::{BroadcastHub, MessageBus, NoopBus};
use juststore::{server, Store};

/// Time given to the relay bridge to flush a write before the process exits
const FLUSH_DELAY: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "juststore")]
#[command(about = "Path-addressable reactive state store with cross-context sync", version)]
#[command(after_help = "Keys are dot-separated paths: the first segment names a namespace,
the rest address a value inside it (object keys or array indices).

Examples:
   juststore set cfg.providers.docker.db '\"tcp://host:2375\"'
   juststore get cfg.providers
   juststore watch cfg --peer ws://localhost:3000/ws
   juststore serve --port 3000")]
struct Cli {
    /// Config file (defaults to .juststore/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .juststore with a default config
    Init {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Print the value at a key
    Get { key: String },

    /// Write a JSON value (bare text is stored as a string)
    Set {
        key: String,
        value: String,

        /// Relay to broadcast the change through, e.g. ws://localhost:3000/ws
        #[arg(long, value_name = "URL")]
        peer: Option<String>,
    },

    /// Delete a key (array elements are spliced out)
    Delete {
        key: String,

        #[arg(long, value_name = "URL")]
        peer: Option<String>,
    },

    /// Print every persisted namespace
    Dump,

    /// Follow a key, printing each new value
    Watch {
        key: String,

        #[arg(long, value_name = "URL")]
        peer: Option<String>,

        /// Only print once the value has settled for `debounce_ms`
        #[arg(long)]
        debounce: bool,
    },

    /// Run the relay service
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(STORE_DIR).join(CONFIG_FILE));

    match cli.command {
        Commands::Init { path } => {
            println!("{}", "🚀 Initializing store...".cyan().bold());
            let config = config::init(&path).await?;
            println!("{} Store initialized", "✓".green());
            println!("  Origin:   {}", config.origin.bright_white());
            println!("  Database: {}", config.db_path().display().to_string().bright_blue());
            println!("\n{}", "Next steps:".yellow());
            println!("  1. {} - Write a value", "juststore set <key> <json>".bright_white());
            println!("  2. {} - Start a relay", "juststore serve".bright_white());
        }

        Commands::Get { key } => {
            let config = StoreConfig::load_or_default(&config_path)?;
            let store = Store::from_config(&config, Arc::new(NoopBus))?;
            print_value(&key, store.get_snapshot(&key).as_ref())?;
        }

        Commands::Set { key, value, peer } => {
            let config = StoreConfig::load_or_default(&config_path)?;
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let (store, bridge) = open_store(&config, peer.as_deref()).await?;

            store.produce(&key, Some(value), false, false);
            println!("{} Set {}", "✓".green(), key.bright_yellow());

            if let Some(bridge) = &bridge {
                tokio::time::sleep(FLUSH_DELAY).await;
                if bridge.is_finished() {
                    tracing::warn!("relay connection closed; the change may not have been relayed");
                }
            }
        }

        Commands::Delete { key, peer } => {
            let config = StoreConfig::load_or_default(&config_path)?;
            let (store, bridge) = open_store(&config, peer.as_deref()).await?;

            if store.get_snapshot(&key).is_none() {
                println!("{} {} is not set", "!".yellow(), key.bright_yellow());
                return Ok(());
            }
            store.produce(&key, None, false, false);
            println!("{} Deleted {}", "✓".green(), key.bright_yellow());

            if let Some(bridge) = &bridge {
                tokio::time::sleep(FLUSH_DELAY).await;
                if bridge.is_finished() {
                    tracing::warn!("relay connection closed; the change may not have been relayed");
                }
            }
        }

        Commands::Dump => {
            let config = StoreConfig::load_or_default(&config_path)?;
            let Some(persistence) = storage::open(&config)? else {
                println!("{} Persistence is disabled in {}", "!".yellow(), config_path.display());
                return Ok(());
            };

            let namespaces = persistence.namespaces()?;
            if namespaces.is_empty() {
                println!("{}", "No namespaces stored".yellow());
            }

            let store = Store::builder().persistence(persistence).build();
            for namespace in namespaces {
                print_value(&namespace, store.get_snapshot(&namespace).as_ref())?;
            }
        }

        Commands::Watch {
            key,
            peer,
            debounce,
        } => {
            let config = StoreConfig::load_or_default(&config_path)?;
            let (store, _bridge) = open_store(&config, peer.as_deref()).await?;
            let (namespace, path) = split_key(&key);

            println!("{} {}", "👁  Watching".cyan().bold(), key.bright_yellow());
            print_value(&key, store.get_snapshot(&key).as_ref())?;

            if debounce {
                let mut watch = store.watch_debounced(namespace, path, config.debounce());
                loop {
                    tokio::select! {
                        changed = watch.changed() => print_change(&key, changed?.as_ref())?,
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            } else {
                let mut watch = store.watch(namespace, path);
                loop {
                    tokio::select! {
                        changed = watch.changed() => print_change(&key, changed?.as_ref())?,
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }
        }

        Commands::Serve { port } => {
            let config = StoreConfig::load_or_default(&config_path)?;
            println!(
                "{}",
                format!("🌐 Starting relay on port {}...", port).cyan().bold()
            );
            server::start(port, config).await?;
        }
    }

    Ok(())
}

/// Store for `config`, bridged to a relay when `peer` is given. The bridge
/// stops when the returned `PeerBridge` is dropped.
async fn open_store(
    config: &StoreConfig,
    peer: Option<&str>,
) -> Result<(Arc<Store>, Option<PeerBridge>)> {
    let Some(url) = peer else {
        return Ok((Store::from_config(config, Arc::new(NoopBus))?, None));
    };

    let hub = BroadcastHub::new(config.channel.clone(), config.bus_capacity);
    let bus: Arc<dyn MessageBus> = hub.endpoint();
    let store = Store::from_config(config, bus)?;

    let bridge = remote::connect_peer(url, hub, &RetryPolicy::default())
        .await
        .with_context(|| format!("Failed to connect to relay {}", url))?;
    println!("{} Connected to {}", "↔".bright_blue(), url.bright_blue());

    Ok((store, Some(bridge)))
}

fn print_value(key: &str, value: Option<&Value>) -> Result<()> {
    match value {
        Some(value) => println!(
            "{} = {}",
            key.bright_yellow(),
            serde_json::to_string_pretty(value)?
        ),
        None => println!("{} {}", key.bright_yellow(), "(not set)".dimmed()),
    }
    Ok(())
}

fn print_change(key: &str, value: Option<&Value>) -> Result<()> {
    print!(
        "{} ",
        chrono::Local::now().format("%H:%M:%S").to_string().bright_black()
    );
    print_value(key, value)
}
