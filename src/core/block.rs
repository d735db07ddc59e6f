//! Block implementation
//!
//! A block is a fixed-length header followed by framed transactions.
//!
//! Header layout (85 bytes, little endian):
//! - version: u8
//! - previous block hash: 32 bytes
//! - time: u32
//! - difficulty target: 32 bytes
//! - nonce: u64
//! - transaction count: u32
//! - body length: u32
//!
//! Each transaction is framed as hash (32) + length (u32) + raw bytes.

use crate::core::policy::GENESIS_DIFFICULTY;
use crate::core::transaction::{Address, Transaction, TransactionError};
use crate::crypto::{calculate_target, difficulty_from_target, double_sha256, sha256, Hash};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

// =============================================================================
// Block Constants
// =============================================================================

/// Current block version
pub const BLOCK_VERSION: u8 = 1;

/// Length of the raw block header in bytes
pub const BLOCK_HEADER_LENGTH: usize = 85;

/// Length of the block hash preimage: header + digest of the tx hash list
pub const BASE_BLOCK_HEADER_LENGTH: usize = 117;

/// Per-transaction framing overhead (hash + length)
pub const TX_FRAME_OVERHEAD: usize = 36;

/// Maximum serialized block size in bytes (1 MiB)
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

/// Timestamp of the genesis block
pub const GENESIS_TIME: u32 = 1_500_000_000;

// =============================================================================
// Block Errors
// =============================================================================

/// Block decoding and validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("Block too large: {0} bytes (max: {1})")]
    BlockTooLarge(usize, usize),
    #[error("Malformed block: {0}")]
    Malformed(&'static str),
    #[error("Unsupported block version {0}")]
    UnsupportedVersion(u8),
    #[error("Invalid difficulty target")]
    InvalidTarget,
    #[error("Transaction hash mismatch at position {0}")]
    TransactionHashMismatch(usize),
    #[error("First transaction must be the payout")]
    MissingPayout,
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),
}

// =============================================================================
// Block Header
// =============================================================================

/// Block header containing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u8,
    pub prev_block: Hash,
    pub time: u32,
    /// Difficulty as number of leading zero bits
    pub difficulty: u32,
    pub nonce: u64,
    pub tx_count: u32,
    pub body_length: u32,
}

impl BlockHeader {
    /// Append the encoded header to `out`
    pub fn write_to(&self, out: &mut BytesMut) {
        out.put_u8(self.version);
        out.put_slice(&self.prev_block);
        out.put_u32_le(self.time);
        out.put_slice(&calculate_target(self.difficulty));
        out.put_u64_le(self.nonce);
        out.put_u32_le(self.tx_count);
        out.put_u32_le(self.body_length);
    }

    /// Decode a header from the front of `buf`
    pub fn read_from(buf: &mut &[u8]) -> Result<Self, BlockError> {
        if buf.remaining() < BLOCK_HEADER_LENGTH {
            return Err(BlockError::Malformed("truncated header"));
        }

        let version = buf.get_u8();
        if version != BLOCK_VERSION {
            return Err(BlockError::UnsupportedVersion(version));
        }

        let mut prev_block = [0u8; 32];
        buf.copy_to_slice(&mut prev_block);
        let time = buf.get_u32_le();

        let mut target = [0u8; 32];
        buf.copy_to_slice(&mut target);
        let difficulty = difficulty_from_target(&target).ok_or(BlockError::InvalidTarget)?;

        Ok(Self {
            version,
            prev_block,
            time,
            difficulty,
            nonce: buf.get_u64_le(),
            tx_count: buf.get_u32_le(),
            body_length: buf.get_u32_le(),
        })
    }
}

/// Append one framed transaction to `out`
pub fn write_tx_frame(out: &mut BytesMut, tx: &Transaction) {
    out.put_slice(tx.hash());
    out.put_u32_le(tx.size() as u32);
    out.put_slice(tx.raw());
}

/// Hash a block from its raw header and its transaction hashes in order
pub fn block_hash<'a>(header: &[u8], tx_hashes: impl IntoIterator<Item = &'a Hash>) -> Hash {
    let mut list = Vec::new();
    for hash in tx_hashes {
        list.extend_from_slice(hash);
    }

    let mut preimage = Vec::with_capacity(BASE_BLOCK_HEADER_LENGTH);
    preimage.extend_from_slice(&header[..BLOCK_HEADER_LENGTH]);
    preimage.extend_from_slice(&sha256(&list));
    double_sha256(&preimage)
}

// =============================================================================
// Block
// =============================================================================

/// A block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    hash: Hash,
    header: BlockHeader,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block (unmined, nonce zero)
    pub fn new(
        prev_block: Hash,
        time: u32,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        let body_length: usize = transactions
            .iter()
            .map(|tx| tx.size() + TX_FRAME_OVERHEAD)
            .sum();

        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_block,
            time,
            difficulty,
            nonce: 0,
            tx_count: transactions.len() as u32,
            body_length: body_length as u32,
        };

        let mut raw_header = BytesMut::with_capacity(BLOCK_HEADER_LENGTH);
        header.write_to(&mut raw_header);
        let hash = block_hash(&raw_header, transactions.iter().map(|tx| tx.hash()));

        Self {
            hash,
            header,
            transactions,
        }
    }

    /// Create the genesis block
    pub fn genesis() -> Self {
        let payout = Transaction::payout(Address::from_key_hash([0; 20]), 0, GENESIS_TIME);
        Self::new([0; 32], GENESIS_TIME, GENESIS_DIFFICULTY, vec![payout])
    }

    /// Decode and structurally check a raw block
    pub fn from_raw(raw: &[u8]) -> Result<Self, BlockError> {
        if raw.len() > MAX_BLOCK_SIZE {
            return Err(BlockError::BlockTooLarge(raw.len(), MAX_BLOCK_SIZE));
        }

        let mut buf = raw;
        let header = BlockHeader::read_from(&mut buf)?;
        if buf.remaining() != header.body_length as usize {
            return Err(BlockError::Malformed("body length mismatch"));
        }

        let mut transactions =
            Vec::with_capacity((header.tx_count as usize).min(MAX_BLOCK_SIZE / TX_FRAME_OVERHEAD));
        for position in 0..header.tx_count as usize {
            if buf.remaining() < TX_FRAME_OVERHEAD {
                return Err(BlockError::Malformed("truncated transaction frame"));
            }
            let mut framed_hash = [0u8; 32];
            buf.copy_to_slice(&mut framed_hash);
            let length = buf.get_u32_le() as usize;
            if buf.remaining() < length {
                return Err(BlockError::Malformed("truncated transaction"));
            }

            let tx = Transaction::from_raw(&buf[..length])?;
            buf.advance(length);
            if *tx.hash() != framed_hash {
                return Err(BlockError::TransactionHashMismatch(position));
            }
            transactions.push(tx);
        }

        if buf.has_remaining() {
            return Err(BlockError::Malformed("trailing bytes"));
        }
        if !transactions.first().is_some_and(Transaction::is_payout)
            || transactions.iter().skip(1).any(Transaction::is_payout)
        {
            return Err(BlockError::MissingPayout);
        }

        let hash = block_hash(&raw[..BLOCK_HEADER_LENGTH], transactions.iter().map(|tx| tx.hash()));
        Ok(Self {
            hash,
            header,
            transactions,
        })
    }

    /// Encode the block
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(self.size());
        self.header.write_to(&mut out);
        for tx in &self.transactions {
            write_tx_frame(&mut out, tx);
        }
        out.to_vec()
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn prev_block(&self) -> &Hash {
        &self.header.prev_block
    }

    pub fn time(&self) -> u32 {
        self.header.time
    }

    pub fn difficulty(&self) -> u32 {
        self.header.difficulty
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Calculate the total size of this block in bytes
    pub fn size(&self) -> usize {
        BLOCK_HEADER_LENGTH + self.header.body_length as usize
    }

    /// Get the payout transaction (first transaction)
    pub fn payout_tx(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_payout())
    }
}
