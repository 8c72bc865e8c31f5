//! PlayToEarn CLI
//!
//! Runs the accrual node with a stdin console, and offers a few one-shot
//! helpers against the same data directory.

mod console;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::Console;
use pte_core::{format_amount, Address, DECIMALS, SYMBOL};
use pte_node::{AfkSet, NodeConfig, OnlineRoster, PteNode};
use pte_storage::PersistenceGateway;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "pte")]
#[command(author = "PlayToEarn Contributors")]
#[command(version)]
#[command(about = "PlayToEarn - credit online players with PTE while they play", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct Location {
    /// Configuration file path [default: <data-dir>/ModConfig/PlayToEarn/base.json]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, default_value = "~/.pte", env = "PTE_DATA_DIR")]
    data_dir: PathBuf,
}

impl Location {
    fn resolve(&self) -> (PathBuf, PathBuf) {
        let data_dir = expand_path(&self.data_dir);
        let config = match &self.config {
            Some(path) => expand_path(path),
            None => data_dir.join("ModConfig/PlayToEarn/base.json"),
        };
        (config, data_dir)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the accrual node with an interactive console
    Node {
        #[command(flatten)]
        location: Location,
    },

    /// Check wallet address syntax
    Validate {
        /// Address to check
        address: String,
    },

    /// Ask a running node to reload the ledger file
    Resync {
        #[command(flatten)]
        location: Location,
    },

    /// Read a balance straight from the ledger file
    Balance {
        /// Wallet address
        address: String,

        #[command(flatten)]
        location: Location,
    },

    /// Version information
    Version,
}

fn init_logging(verbose: bool, configured: Option<&str>) {
    let fallback = if verbose {
        "debug"
    } else {
        configured.unwrap_or("info")
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false),
        )
        .init();
}

/// Log level from the config file, read quietly before logging exists
fn configured_level(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let config: NodeConfig = serde_json::from_str(&content).ok()?;
    Some(config.logging.level)
}

fn expand_path(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|p| p.strip_prefix('~')) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    path.to_path_buf()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Node { location } => {
            let (config_path, data_dir) = location.resolve();
            init_logging(cli.verbose, configured_level(&config_path).as_deref());
            run_node(&config_path, &data_dir).await?;
        }

        Commands::Validate { address } => {
            init_logging(cli.verbose, None);
            match Address::parse(&address) {
                Ok(address) => println!("{} is a valid wallet", address),
                Err(e) => anyhow::bail!("[{}] {}", e.code(), e),
            }
        }

        Commands::Resync { location } => {
            let (config_path, data_dir) = location.resolve();
            init_logging(cli.verbose, configured_level(&config_path).as_deref());

            let config = NodeConfig::load_or_create(&config_path, &data_dir);
            let gateway = PersistenceGateway::new(config.storage_paths());
            gateway
                .request_resync()
                .context("Cannot raise the resync marker")?;
            println!(
                "Resync requested, the node reloads {} on its next tick",
                gateway.paths().ledger.display()
            );
        }

        Commands::Balance { address, location } => {
            let (config_path, data_dir) = location.resolve();
            init_logging(cli.verbose, configured_level(&config_path).as_deref());

            let address = Address::parse(&address)
                .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))?;
            let config = NodeConfig::load_or_create(&config_path, &data_dir);
            let gateway = PersistenceGateway::new(config.storage_paths());

            let ledger = gateway
                .load_ledger()
                .context("Cannot read the ledger")?
                .unwrap_or_default();
            match ledger.get(&address) {
                Some(balance) => println!("{}: {} {}", address, format_amount(*balance), SYMBOL),
                None => println!("{}: no balance recorded", address),
            }
        }

        Commands::Version => {
            println!("PlayToEarn v{}", env!("CARGO_PKG_VERSION"));
            println!("Token: {} ({} decimals)", SYMBOL, DECIMALS);
        }
    }

    Ok(())
}

async fn run_node(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    tracing::info!("PlayToEarn node v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config: {}", config_path.display());
    tracing::info!("Data: {}", data_dir.display());

    let config = NodeConfig::load_or_create(config_path, data_dir);
    let roster = Arc::new(OnlineRoster::new());
    let afk = Arc::new(AfkSet::new());
    let node = Arc::new(PteNode::start(config, roster.clone(), afk.clone())?);

    let (quit_tx, quit_rx) = oneshot::channel();
    let console = Console {
        node: node.clone(),
        roster,
        afk,
    };
    let console_handle = tokio::spawn(console.run(quit_tx));

    println!("Type 'help' for commands, 'quit' or Ctrl+C to stop");
    node.run(wait_for_shutdown(quit_rx)).await?;
    console_handle.abort();

    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM or the console `quit` command
async fn wait_for_shutdown(quit_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let quit = async {
        if quit_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = quit => {},
    }
}
