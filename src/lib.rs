//! Mining Core: block template assembly and mining task coordination
//!
//! This crate provides the mining side of a full node:
//! - Block subsidy schedule, difficulty adjustment and fee rules
//! - Greedy block template assembly under a 1 MiB budget
//! - A mining task controller publishing tasks for external workers
//! - Found block hand-off and integration into an in-memory chain store
//! - Confirmation queries
//! - JSON chain snapshots to start from and persist across restarts
//!
//! # Example
//!
//! ```rust,no_run
//! use mining_core::config::NodeConfig;
//! use mining_core::core::{Blockchain, ChainLock, ChainState};
//! use mining_core::mining::{BlockProcessor, Mempool, MiningController, Session};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeConfig::load("node.json".as_ref())?;
//! let chain = ChainLock::new(ChainState::new(Blockchain::new(), Mempool::new()));
//! let session = Arc::new(Session::new());
//! session.set_synced(true);
//!
//! let (controller, handle, found_blocks) = MiningController::new(
//!     chain.clone(),
//!     session.clone(),
//!     config.miner.settings()?,
//!     Arc::new(config.policy),
//! );
//! controller.spawn();
//! tokio::spawn(BlockProcessor::new(chain, handle.clone()).run(found_blocks));
//!
//! // Workers poll the current task
//! let task = session.current();
//! println!("Active: {}, reward: {}", task.active, task.reward);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod snapshot;

// Re-export commonly used types
pub use config::{ConfigError, MinerConfig, NodeConfig};
pub use core::{
    Address, Block, Blockchain, ChainLock, ChainState, EconomicPolicy, Transaction,
};
pub use mining::{
    BlockProcessor, BlockTemplate, ControllerHandle, Mempool, MiningController, MiningTask,
    Session,
};
pub use snapshot::{ChainSnapshot, SnapshotError};
