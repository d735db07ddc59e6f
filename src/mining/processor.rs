//! Block processor
//!
//! Integrates blocks found by workers into the chain store, drops their
//! transactions from the mempool and asks the controller for a new task.

use crate::core::{Block, BlockError, BlockMeta, ChainError, ChainLock};
use crate::crypto::Hash;
use crate::mining::controller::{ControllerError, ControllerHandle};
use thiserror::Error;
use tokio::sync::mpsc;

/// A decoded found-block notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundBlock {
    pub hash: Hash,
    pub data: Vec<u8>,
    pub tx_hashes: Vec<Hash>,
}

/// Found block integration errors
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),
    #[error("Block hash mismatch: announced {announced}, computed {computed}")]
    HashMismatch { announced: String, computed: String },
    #[error("Announced transaction list does not match the block")]
    TxListMismatch,
    #[error("Chain rejected block: {0}")]
    Chain(#[from] ChainError),
    #[error("Controller unavailable: {0}")]
    Controller(#[from] ControllerError),
}

/// Consumer of found blocks
#[derive(Debug, Clone)]
pub struct BlockProcessor {
    chain: ChainLock,
    controller: ControllerHandle,
}

impl BlockProcessor {
    pub fn new(chain: ChainLock, controller: ControllerHandle) -> Self {
        Self { chain, controller }
    }

    /// Add one found block to the chain
    pub async fn integrate(&self, found: FoundBlock) -> Result<BlockMeta, ProcessorError> {
        let block = Block::from_raw(&found.data)?;
        if *block.hash() != found.hash {
            return Err(ProcessorError::HashMismatch {
                announced: hex::encode(found.hash),
                computed: hex::encode(block.hash()),
            });
        }

        let included: Vec<Hash> = block.transactions().iter().map(|tx| *tx.hash()).collect();
        if included != found.tx_hashes {
            return Err(ProcessorError::TxListMismatch);
        }

        let (meta, removed) = {
            let mut guard = self.chain.acquire("found block integration").await;
            let meta = guard.chain.add_block(block)?;
            let removed = guard.mempool.remove_included(&included);
            (meta, removed)
        };

        log::info!(
            "Block {} added at height {} on branch {} ({} transactions left the mempool)",
            hex::encode(found.hash),
            meta.height,
            meta.branch_id,
            removed
        );

        self.controller.request_rebuild()?;
        Ok(meta)
    }

    /// Process found blocks until the controller side closes
    pub async fn run(self, mut found_blocks: mpsc::UnboundedReceiver<FoundBlock>) {
        while let Some(found) = found_blocks.recv().await {
            if let Err(e) = self.integrate(found).await {
                log::warn!("Failed to integrate found block: {}", e);
            }
        }
        log::debug!("Block processor stopped");
    }
}
