//! Block template
//!
//! Mutable candidate block assembled from the master tip and the mempool.
//! The payout transaction is added last but always serialized first, so its
//! slot is reserved in the size budget from the start.

use crate::core::block::{write_tx_frame, BlockHeader, BLOCK_VERSION};
use crate::core::{
    OutPoint, SpendContext, Transaction, TxOutput, BLOCK_HEADER_LENGTH, MAX_BLOCK_SIZE,
    PAYOUT_TX_LENGTH, TX_FRAME_OVERHEAD,
};
use crate::crypto::Hash;
use bytes::BytesMut;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Offset of the time field inside the raw header
const TIME_OFFSET: usize = 1 + 32;

/// Bytes reserved for the payout transaction and its frame
pub const PAYOUT_SLOT: usize = PAYOUT_TX_LENGTH + TX_FRAME_OVERHEAD;

/// Template construction errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Previous block must be set before adding transactions")]
    MissingPrevBlock,
    #[error("Payout transaction has not been added")]
    MissingPayout,
    #[error("Payout transaction already set")]
    PayoutAlreadySet,
    #[error("Expected a payout transaction")]
    NotPayout,
    #[error("Payout transactions can only be added first")]
    PayoutInBody,
    #[error("Transaction {0} already in template")]
    Duplicate(String),
    #[error("Block full: {size} bytes (max: {max})")]
    BlockFull { size: usize, max: usize },
}

/// Candidate block under construction
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    prev_block: Option<Hash>,
    time: u32,
    difficulty: u32,
    payout: Option<Transaction>,
    transactions: Vec<Transaction>,
    included: HashSet<Hash>,
    spent: HashSet<OutPoint>,
    /// Outputs created by included mempool transactions
    created: HashMap<OutPoint, TxOutput>,
    /// Framed non-payout transactions, in order
    body: BytesMut,
    /// Header plus every framed transaction added so far
    size: usize,
    raw: Vec<u8>,
}

impl Default for BlockTemplate {
    fn default() -> Self {
        Self::create()
    }
}

impl BlockTemplate {
    /// Empty template: no previous block, no transactions
    pub fn create() -> Self {
        Self {
            prev_block: None,
            time: 0,
            difficulty: 0,
            payout: None,
            transactions: Vec::new(),
            included: HashSet::new(),
            spent: HashSet::new(),
            created: HashMap::new(),
            body: BytesMut::new(),
            size: BLOCK_HEADER_LENGTH,
            raw: Vec::new(),
        }
    }

    pub fn set_prev_block(&mut self, hash: Hash) {
        self.prev_block = Some(hash);
        self.raw.clear();
    }

    /// Set the header time. An already serialized template is patched in
    /// place; transactions and sizes are untouched.
    pub fn set_time(&mut self, time: u32) {
        self.time = time;
        if self.raw.len() >= BLOCK_HEADER_LENGTH {
            self.raw[TIME_OFFSET..TIME_OFFSET + 4].copy_from_slice(&time.to_le_bytes());
        }
    }

    /// Move the header time forward to `now`, never backwards
    pub fn refresh_time(&mut self, now: u32) {
        if now > self.time {
            self.set_time(now);
        }
    }

    pub fn set_difficulty(&mut self, difficulty: u32) {
        self.difficulty = difficulty;
        self.raw.clear();
    }

    /// Bytes still available for mempool transactions
    pub fn remaining(&self) -> usize {
        let reserved = if self.payout.is_some() { 0 } else { PAYOUT_SLOT };
        MAX_BLOCK_SIZE.saturating_sub(self.size + reserved)
    }

    /// Whether a transaction of `tx_size` raw bytes still fits
    pub fn has_room_for(&self, tx_size: usize) -> bool {
        tx_size + TX_FRAME_OVERHEAD <= self.remaining()
    }

    /// Append a mempool transaction
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), TemplateError> {
        if self.prev_block.is_none() {
            return Err(TemplateError::MissingPrevBlock);
        }
        if tx.is_payout() {
            return Err(TemplateError::PayoutInBody);
        }
        if self.included.contains(tx.hash()) {
            return Err(TemplateError::Duplicate(hex::encode(tx.hash())));
        }
        if !self.has_room_for(tx.size()) {
            return Err(TemplateError::BlockFull {
                size: self.size + tx.size() + TX_FRAME_OVERHEAD,
                max: MAX_BLOCK_SIZE,
            });
        }

        write_tx_frame(&mut self.body, &tx);
        self.size += tx.size() + TX_FRAME_OVERHEAD;
        self.included.insert(*tx.hash());
        self.spent.extend(tx.inputs().iter().copied());
        self.created.extend(
            tx.outputs()
                .iter()
                .enumerate()
                .map(|(index, output)| (OutPoint::new(*tx.hash(), index as u16), output.clone())),
        );
        self.transactions.push(tx);
        self.raw.clear();
        Ok(())
    }

    /// Place the payout transaction at position 0. Allowed exactly once.
    pub fn add_first_transaction(&mut self, tx: Transaction) -> Result<(), TemplateError> {
        if self.prev_block.is_none() {
            return Err(TemplateError::MissingPrevBlock);
        }
        if self.payout.is_some() {
            return Err(TemplateError::PayoutAlreadySet);
        }
        if !tx.is_payout() {
            return Err(TemplateError::NotPayout);
        }

        let size = self.size + tx.size() + TX_FRAME_OVERHEAD;
        if size > MAX_BLOCK_SIZE {
            return Err(TemplateError::BlockFull {
                size,
                max: MAX_BLOCK_SIZE,
            });
        }

        self.size = size;
        self.included.insert(*tx.hash());
        self.payout = Some(tx);
        self.raw.clear();
        Ok(())
    }

    /// Encode the template as a raw block with a zero nonce
    pub fn serialize(&mut self) -> Result<&[u8], TemplateError> {
        let prev_block = self.prev_block.ok_or(TemplateError::MissingPrevBlock)?;
        let payout = self.payout.as_ref().ok_or(TemplateError::MissingPayout)?;

        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_block,
            time: self.time,
            difficulty: self.difficulty,
            nonce: 0,
            tx_count: self.tx_count() as u32,
            body_length: (self.size - BLOCK_HEADER_LENGTH) as u32,
        };

        let mut out = BytesMut::with_capacity(self.size);
        header.write_to(&mut out);
        write_tx_frame(&mut out, payout);
        out.extend_from_slice(&self.body);

        self.raw = out.to_vec();
        Ok(&self.raw)
    }

    /// Last serialized bytes; empty if the template changed since
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn header_length(&self) -> usize {
        BLOCK_HEADER_LENGTH
    }

    /// Transaction hashes in block order, payout first
    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.payout
            .iter()
            .chain(&self.transactions)
            .map(|tx| *tx.hash())
            .collect()
    }

    /// Number of transactions including the payout
    pub fn tx_count(&self) -> usize {
        self.transactions.len() + usize::from(self.payout.is_some())
    }

    /// Current block size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn prev_block(&self) -> Option<&Hash> {
        self.prev_block.as_ref()
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn payout(&self) -> Option<&Transaction> {
        self.payout.as_ref()
    }
}

impl SpendContext for BlockTemplate {
    fn spends(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint)
    }

    fn includes(&self, hash: &Hash) -> bool {
        self.included.contains(hash)
    }

    fn created(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.created.get(outpoint)
    }
}
