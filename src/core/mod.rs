//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (raw codec, payout transactions, validation)
//! - Blocks (header codec and framed transactions)
//! - Blockchain (in-memory branch store)
//! - Chain state (branch/block metadata, branch structures)
//! - Chain lock (exclusive access to chain and mempool)
//! - Economic policy (subsidy, difficulty, fees)

pub mod block;
pub mod blockchain;
pub mod chain_state;
pub mod lock;
pub mod policy;
pub mod transaction;

pub use block::{
    Block, BlockError, BlockHeader, BASE_BLOCK_HEADER_LENGTH, BLOCK_HEADER_LENGTH,
    MAX_BLOCK_SIZE, TX_FRAME_OVERHEAD,
};
pub use blockchain::{Blockchain, ChainError, ChainStats};
pub use chain_state::{
    BlockMeta, BranchId, BranchMeta, BranchStructure, UnspentOutput, MAX_FUTURE_BLOCK_TIME,
};
pub use lock::{ChainGuard, ChainLock, ChainState};
pub use policy::{format_coins, EconomicPolicy, PolicyError, RewardFactor, COIN};
pub use transaction::{
    Address, OutPoint, SpendContext, Transaction, TransactionError, TxOutput, PAYOUT_TX_LENGTH,
};
