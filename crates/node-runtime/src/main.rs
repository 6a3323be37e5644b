//! # Consent Node
//!
//! Entry point for a controller or processor node taking part in the
//! consent ledger.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from `CC_*` environment variables
//! 2. Validate the ledger identities
//! 3. Assemble the node container
//! 4. Processor mode: wait for the ledger node, then arm the listeners
//! 5. Run until Ctrl+C, then cancel pending waits and tear down listeners
//!
//! `consent-node deploy --abi <file> --bytecode <file>` publishes the consent
//! contract instead and stores its binding in `CC_CONFIG_STORE`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use consent_sync::StartOutcome;
use node_runtime::container::{load_config, NodeContainer};

/// Consent ledger node
#[derive(Parser, Debug)]
#[command(name = "consent-node")]
#[command(about = "Synchronizes subject consent and erasure over a shared ledger")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node (default)
    Run,
    /// Deploy the consent contract and record its binding
    Deploy {
        /// Contract ABI (JSON)
        #[arg(long)]
        abi: PathBuf,
        /// Contract creation bytecode (hex)
        #[arg(long)]
        bytecode: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_config();
    if config.storage.config_store.is_none() {
        info!("[config] CC_CONFIG_STORE not set, contract binding kept in memory");
    }
    let node = NodeContainer::new(config).context("Failed to assemble node")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(node).await,
        Command::Deploy { abi, bytecode } => deploy(node, &abi, &bytecode).await,
    }
}

async fn run(node: NodeContainer) -> Result<()> {
    info!("===========================================");
    info!("  Consent Node v{}", env!("CARGO_PKG_VERSION"));
    info!("  Role: {:?}", node.config.role());
    info!("  Ledger: {}", node.config.ledger.rpc_url);
    info!("===========================================");

    tokio::select! {
        started = node.start() => {
            match started.context("Failed to start listeners")? {
                StartOutcome::Skipped => info!("Controller mode, serving local actions only"),
                StartOutcome::Started { .. } => info!("Processor listeners running"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            node.shutdown();
            return Ok(());
        }
    }

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    node.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn deploy(node: NodeContainer, abi: &Path, bytecode: &Path) -> Result<()> {
    let abi_json = tokio::fs::read_to_string(abi)
        .await
        .with_context(|| format!("Failed to read ABI {}", abi.display()))?;
    let code = tokio::fs::read_to_string(bytecode)
        .await
        .with_context(|| format!("Failed to read bytecode {}", bytecode.display()))?;
    let code = code.trim();
    let code = hex::decode(code.strip_prefix("0x").unwrap_or(code))
        .context("Bytecode is not valid hex")?;
    if code.is_empty() {
        bail!("Bytecode file {} is empty", bytecode.display());
    }

    let address = node.deploy(&abi_json, &code).await?;
    info!(address = %address, "Consent contract deployed");
    println!("{address}");
    Ok(())
}
