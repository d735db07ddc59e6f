//! Chain snapshot
//!
//! JSON file holding hex-encoded raw blocks, parents before children, and
//! the pending transactions in arrival order. The node starts from it and
//! writes it back on shutdown, so mined blocks survive a restart.

use crate::core::{
    Block, BlockError, Blockchain, ChainError, ChainState, Transaction, TransactionError,
};
use crate::mining::{Mempool, MempoolError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

/// Snapshot errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Invalid block: {0}")]
    Block(#[from] BlockError),
    #[error("Invalid transaction: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Chain rejected block: {0}")]
    Chain(#[from] ChainError),
    #[error("Mempool rejected transaction: {0}")]
    Mempool(#[from] MempoolError),
}

/// Serialized chain store and mempool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSnapshot {
    pub blocks: Vec<String>,
    pub transactions: Vec<String>,
}

impl ChainSnapshot {
    /// Capture every stored block and pending transaction
    pub fn capture(state: &ChainState) -> Self {
        Self {
            blocks: state
                .chain
                .blocks_in_height_order()
                .into_iter()
                .map(|block| hex::encode(block.to_raw()))
                .collect(),
            transactions: state
                .mempool
                .pending()
                .map(|tx| hex::encode(tx.raw()))
                .collect(),
        }
    }

    /// Rebuild the chain store and mempool. An empty block list gives a
    /// chain holding only genesis.
    pub fn restore(&self) -> Result<ChainState, SnapshotError> {
        let mut chain = if self.blocks.is_empty() {
            Blockchain::new()
        } else {
            Blockchain::empty()
        };
        for encoded in &self.blocks {
            chain.add_block(Block::from_raw(&decode_hex(encoded)?)?)?;
        }

        let mut mempool = Mempool::new();
        for encoded in &self.transactions {
            mempool.add(Transaction::from_raw(&decode_hex(encoded)?)?)?;
        }

        log::info!(
            "Restored {} blocks and {} pending transactions",
            self.blocks.len(),
            mempool.len()
        );
        Ok(ChainState::new(chain, mempool))
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

fn decode_hex(encoded: &str) -> Result<Vec<u8>, SnapshotError> {
    hex::decode(encoded).map_err(|e| SnapshotError::InvalidData(e.to_string()))
}
