//! Chain State
//!
//! Branch and block metadata read through the chain facade, and the branch
//! structure used to validate transactions against one fork of the chain.

use crate::core::transaction::{OutPoint, Transaction, TxOutput};
use crate::crypto::Hash;
use std::collections::{HashMap, HashSet};

/// Maximum allowed time drift into the future (2 hours in seconds)
pub const MAX_FUTURE_BLOCK_TIME: u32 = 7200;

/// Identifier of a branch tracked by the chain store
pub type BranchId = u32;

/// Represents a branch (a candidate fork ending in a tip)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchMeta {
    /// Branch identifier
    pub id: BranchId,
    /// Height of the tip + 1
    pub length: u64,
    /// Hash of the tip block
    pub last_block_hash: Hash,
}

impl BranchMeta {
    pub fn new(id: BranchId, length: u64, last_block_hash: Hash) -> Self {
        Self {
            id,
            length,
            last_block_hash,
        }
    }

    /// Depth of a block at `height` below the tip of this branch
    pub fn confirmations(&self, height: u64) -> i64 {
        self.length as i64 - 1 - height as i64
    }
}

/// Where a block lives in the chain store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub branch_id: BranchId,
    pub height: u64,
}

/// An unspent output as seen from a branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub output: TxOutput,
    /// Height of the block that created the output
    pub height: u64,
    /// Whether the output was created by a payout transaction
    pub from_payout: bool,
}

/// Transaction validation context for one branch: its unspent outputs and
/// every transaction hash it already contains.
#[derive(Debug, Clone, Default)]
pub struct BranchStructure {
    unspent: HashMap<OutPoint, UnspentOutput>,
    txs: HashSet<Hash>,
}

impl BranchStructure {
    /// Apply a block's transactions at `height`, in block order
    pub fn apply_block(&mut self, height: u64, transactions: &[Transaction]) {
        for tx in transactions {
            for input in tx.inputs() {
                self.unspent.remove(input);
            }

            for (index, output) in tx.outputs().iter().enumerate() {
                self.unspent.insert(
                    OutPoint::new(*tx.hash(), index as u16),
                    UnspentOutput {
                        output: output.clone(),
                        height,
                        from_payout: tx.is_payout(),
                    },
                );
            }

            self.txs.insert(*tx.hash());
        }
    }

    /// Register a single unspent output
    pub fn insert_unspent(&mut self, outpoint: OutPoint, unspent: UnspentOutput) {
        self.unspent.insert(outpoint, unspent);
    }

    pub fn unspent(&self, outpoint: &OutPoint) -> Option<&UnspentOutput> {
        self.unspent.get(outpoint)
    }

    pub fn contains_tx(&self, hash: &Hash) -> bool {
        self.txs.contains(hash)
    }

    /// Number of unspent outputs on the branch
    pub fn unspent_count(&self) -> usize {
        self.unspent.len()
    }
}
