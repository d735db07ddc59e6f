//! Mining Core node
//!
//! Runs the mining task controller against an in-memory chain restored from
//! a snapshot file, and offers a few helpers around the configuration and
//! the subsidy schedule.

use clap::{Parser, Subcommand};
use mining_core::config::NodeConfig;
use mining_core::core::{format_coins, ChainLock};
use mining_core::mining::{BlockProcessor, MiningController, Session};
use mining_core::snapshot::ChainSnapshot;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mining-core")]
#[command(version = "0.1.0")]
#[command(about = "Block template assembly and mining task coordination", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "node.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mining controller until interrupted.
    ///
    /// Tasks are only published once the chain has a block above genesis,
    /// so point --snapshot at a file holding such a chain.
    Run {
        /// Chain snapshot to start from; written back on shutdown
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output file path
        #[arg(short, long, default_value = "node.json")]
        output: PathBuf,
    },

    /// Show the block subsidy at a height
    Subsidy {
        /// Block height
        #[arg(long)]
        height: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { output } => {
            NodeConfig::default().save(&output)?;
            println!("✅ Wrote default configuration to {}", output.display());
            println!("   Add payout addresses under miner.addresses and set miner.enabled");
        }

        Commands::Subsidy { height } => {
            let policy = if cli.config.exists() {
                NodeConfig::load(&cli.config)?.policy
            } else {
                NodeConfig::default().policy
            };
            let subsidy = policy.block_subsidy(height);
            println!(
                "Block subsidy at height {}: {} ({} coins)",
                height,
                subsidy,
                format_coins(subsidy)
            );
        }

        Commands::Run { snapshot } => run(NodeConfig::load(&cli.config)?, snapshot)?,
    }

    Ok(())
}

fn run(
    config: NodeConfig,
    snapshot: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config.miner.settings()?;
    let policy = Arc::new(config.policy);

    let state = match &snapshot {
        Some(path) if path.exists() => ChainSnapshot::load(path)?.restore()?,
        _ => ChainSnapshot::default().restore()?,
    };
    if state.chain.chain_length() < 2 {
        println!("⚠️  Chain holds only genesis, no mining task until a block arrives");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let chain = ChainLock::new(state);
        let session = Arc::new(Session::new());
        // Block sync is not part of this node
        session.set_synced(true);

        let (controller, handle, found_blocks) =
            MiningController::new(chain.clone(), session.clone(), settings, policy);
        let controller_task = controller.spawn();
        tokio::spawn(BlockProcessor::new(chain.clone(), handle.clone()).run(found_blocks));

        let mut tasks = session.subscribe();
        tokio::spawn(async move {
            while tasks.changed().await.is_ok() {
                let task = tasks.borrow_and_update().clone();
                log::debug!(
                    "Task {} ({} transactions, reward {})",
                    if task.active { "active" } else { "inactive" },
                    task.tx_hash_list.len(),
                    task.reward
                );
            }
        });

        println!("⛏️  Mining controller running, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        println!("\n📴 Shutting down...");

        handle.shutdown()?;
        controller_task.await?;

        let guard = chain.acquire("shutdown").await;
        if let Some(path) = &snapshot {
            ChainSnapshot::capture(&guard).save(path)?;
            println!("💾 Saved chain snapshot to {}", path.display());
        }

        let stats = guard.chain.stats();
        println!(
            "   Chain length {} ({} blocks, {} branches), tip {}",
            stats.length, stats.total_blocks, stats.branches, stats.latest_hash
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
