//! Transaction pool (mempool) for pending transactions
//!
//! Holds unconfirmed transactions in arrival order. Template assembly walks
//! the pool in that order and evicts whatever fails validation; found blocks
//! remove the transactions they include.

use crate::core::Transaction;
use crate::crypto::Hash;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

// =============================================================================
// Configuration
// =============================================================================

/// Default maximum mempool transaction count
pub const DEFAULT_MEMPOOL_SIZE: usize = 10000;

/// Maximum mempool size in bytes
pub const MAX_MEMPOOL_BYTES: usize = 300_000_000;

// =============================================================================
// Error Types
// =============================================================================

/// Mempool errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Transaction already exists")]
    DuplicateTransaction,
    #[error("Payout transactions are created by the miner only")]
    PayoutTransaction,
    #[error("Mempool full")]
    MempoolFull,
    #[error("Mempool size limit exceeded: {0} bytes (max: {1})")]
    MempoolSizeExceeded(usize, usize),
}

// =============================================================================
// Mempool Entry
// =============================================================================

/// Entry in the mempool with metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    /// When the transaction was added (Unix timestamp)
    pub added_time: i64,
    /// Arrival sequence number, key into the arrival index
    sequence: u64,
}

// =============================================================================
// Mempool
// =============================================================================

/// Memory pool for pending transactions
#[derive(Debug)]
pub struct Mempool {
    /// Transactions indexed by hash
    entries: HashMap<Hash, MempoolEntry>,
    /// Transaction hashes keyed by arrival sequence
    by_time: BTreeMap<u64, Hash>,
    next_sequence: u64,
    /// Maximum pool size
    max_size: usize,
    /// Sum of raw transaction sizes
    total_size: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}

impl Mempool {
    /// Create a new mempool
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MEMPOOL_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_time: BTreeMap::new(),
            next_sequence: 0,
            max_size,
            total_size: 0,
        }
    }

    /// Add a transaction to the back of the pool.
    ///
    /// Only structural admission checks happen here; spending rules are
    /// enforced when a block template is assembled.
    pub fn add(&mut self, tx: Transaction) -> Result<(), MempoolError> {
        if self.entries.contains_key(tx.hash()) {
            return Err(MempoolError::DuplicateTransaction);
        }
        if tx.is_payout() {
            return Err(MempoolError::PayoutTransaction);
        }
        if self.entries.len() >= self.max_size {
            return Err(MempoolError::MempoolFull);
        }
        if self.total_size + tx.size() > MAX_MEMPOOL_BYTES {
            return Err(MempoolError::MempoolSizeExceeded(
                self.total_size + tx.size(),
                MAX_MEMPOOL_BYTES,
            ));
        }

        let hash = *tx.hash();
        self.total_size += tx.size();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_time.insert(sequence, hash);
        self.entries.insert(
            hash,
            MempoolEntry {
                tx,
                added_time: chrono::Utc::now().timestamp(),
                sequence,
            },
        );
        Ok(())
    }

    /// Iterate pending transactions in arrival order
    pub fn pending(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.by_time
            .values()
            .filter_map(|hash| self.entries.get(hash).map(|e| &e.tx))
    }

    /// Permanently drop a transaction from the pool
    pub fn evict(&mut self, hash: &Hash) -> Option<Transaction> {
        let entry = self.entries.remove(hash)?;
        self.by_time.remove(&entry.sequence);
        self.total_size -= entry.tx.size();
        Some(entry.tx)
    }

    /// Remove transactions that are now in a block
    pub fn remove_included(&mut self, hashes: &[Hash]) -> usize {
        hashes
            .iter()
            .filter(|hash| self.evict(hash).is_some())
            .count()
    }

    /// Get a transaction by hash
    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.entries.get(hash).map(|e| &e.tx)
    }

    pub fn get_entry(&self, hash: &Hash) -> Option<&MempoolEntry> {
        self.entries.get(hash)
    }

    /// Check if a transaction is in the pool
    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Get the number of pending transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get mempool statistics
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            tx_count: self.entries.len(),
            total_size: self.total_size,
        }
    }
}

/// Mempool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub total_size: usize,
}
