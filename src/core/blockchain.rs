//! Blockchain implementation
//!
//! In-memory block store tracking every known branch. The longest branch is
//! the master branch; ties keep the current master.

use crate::core::block::Block;
use crate::core::chain_state::{
    BlockMeta, BranchId, BranchMeta, BranchStructure, MAX_FUTURE_BLOCK_TIME,
};
use crate::crypto::Hash;
use std::collections::HashMap;
use thiserror::Error;

/// Blockchain-related errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChainError {
    #[error("Duplicate block {0}")]
    DuplicateBlock(String),
    #[error("Unknown parent block {0}")]
    UnknownParent(String),
    #[error("Unknown branch {0}")]
    UnknownBranch(BranchId),
    #[error("Block not found: {0}")]
    BlockNotFound(String),
    #[error("Chain has no blocks")]
    Empty,
}

#[derive(Debug, Clone)]
struct StoredBlock {
    block: Block,
    meta: BlockMeta,
}

/// The main blockchain structure
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: HashMap<Hash, StoredBlock>,
    /// Branch id is the index into this list
    branches: Vec<BranchMeta>,
    master: Option<BranchId>,
}

impl Blockchain {
    /// Create a new blockchain with genesis block
    pub fn new() -> Self {
        let mut blockchain = Self::empty();
        blockchain.insert_genesis(Block::genesis());
        blockchain
    }

    /// Create a store without any block
    pub fn empty() -> Self {
        Self {
            blocks: HashMap::new(),
            branches: Vec::new(),
            master: None,
        }
    }

    fn insert_genesis(&mut self, genesis: Block) -> BlockMeta {
        let meta = BlockMeta {
            branch_id: 0,
            height: 0,
        };
        self.branches = vec![BranchMeta::new(0, 1, *genesis.hash())];
        self.master = Some(0);
        self.blocks.insert(
            *genesis.hash(),
            StoredBlock {
                block: genesis,
                meta,
            },
        );
        meta
    }

    /// Add a block on top of any known block.
    ///
    /// Extending a branch tip grows that branch; any other parent starts a
    /// new branch. Returns where the block was stored.
    pub fn add_block(&mut self, block: Block) -> Result<BlockMeta, ChainError> {
        let hash = *block.hash();
        if self.blocks.contains_key(&hash) {
            return Err(ChainError::DuplicateBlock(hex::encode(hash)));
        }

        if self.master.is_none() {
            if *block.prev_block() != [0; 32] {
                return Err(ChainError::UnknownParent(hex::encode(block.prev_block())));
            }
            return Ok(self.insert_genesis(block));
        }

        let parent = self
            .blocks
            .get(block.prev_block())
            .map(|stored| stored.meta)
            .ok_or_else(|| ChainError::UnknownParent(hex::encode(block.prev_block())))?;
        let height = parent.height + 1;

        let parent_branch = self
            .branches
            .get_mut(parent.branch_id as usize)
            .ok_or(ChainError::UnknownBranch(parent.branch_id))?;

        let branch_id = if parent_branch.last_block_hash == *block.prev_block() {
            parent_branch.length = height + 1;
            parent_branch.last_block_hash = hash;
            parent_branch.id
        } else {
            let id = self.branches.len() as BranchId;
            self.branches.push(BranchMeta::new(id, height + 1, hash));
            log::debug!("Fork at height {} opened branch {}", height, id);
            id
        };

        let meta = BlockMeta { branch_id, height };
        self.blocks.insert(hash, StoredBlock { block, meta });
        self.update_master(branch_id);

        Ok(meta)
    }

    fn update_master(&mut self, candidate: BranchId) {
        let current = self.master.and_then(|id| self.branches.get(id as usize));
        let candidate_length = self.branches[candidate as usize].length;

        match current {
            Some(master) if master.id == candidate || master.length >= candidate_length => {}
            Some(master) => {
                log::info!(
                    "Master branch switched from {} to {} (length {})",
                    master.id,
                    candidate,
                    candidate_length
                );
                self.master = Some(candidate);
            }
            None => self.master = Some(candidate),
        }
    }

    /// Length of the master branch, 0 for an empty store
    pub fn chain_length(&self) -> u64 {
        self.master_branch_tip().map_or(0, |tip| tip.length)
    }

    /// Get the master branch
    pub fn master_branch_tip(&self) -> Option<&BranchMeta> {
        self.master.and_then(|id| self.branch_by_id(id))
    }

    pub fn branch_by_id(&self, id: BranchId) -> Option<&BranchMeta> {
        self.branches.get(id as usize)
    }

    /// Get a block by hash
    pub fn block_by_hash(&self, hash: &Hash) -> Option<&Block> {
        self.blocks.get(hash).map(|stored| &stored.block)
    }

    pub fn block_meta_by_hash(&self, hash: &Hash) -> Option<BlockMeta> {
        self.blocks.get(hash).map(|stored| stored.meta)
    }

    /// Every stored block, parents before children
    pub fn blocks_in_height_order(&self) -> Vec<&Block> {
        let mut stored: Vec<&StoredBlock> = self.blocks.values().collect();
        stored.sort_by_key(|stored| (stored.meta.height, stored.meta.branch_id));
        stored.into_iter().map(|stored| &stored.block).collect()
    }

    /// Unspent outputs and included transactions of a branch, built by
    /// replaying it from genesis to its tip
    pub fn branch_structure(&self, id: BranchId) -> Result<BranchStructure, ChainError> {
        let branch = self.branch_by_id(id).ok_or(ChainError::UnknownBranch(id))?;

        let mut path = Vec::with_capacity(branch.length as usize);
        let mut cursor = branch.last_block_hash;
        loop {
            let stored = self
                .blocks
                .get(&cursor)
                .ok_or_else(|| ChainError::BlockNotFound(hex::encode(cursor)))?;
            path.push(stored);
            if stored.meta.height == 0 {
                break;
            }
            cursor = *stored.block.prev_block();
        }

        let mut structure = BranchStructure::default();
        for stored in path.iter().rev() {
            structure.apply_block(stored.meta.height, stored.block.transactions());
        }
        Ok(structure)
    }

    /// Number of master branch blocks with `start <= time <= end`.
    ///
    /// Block times are only loosely ordered, so the walk back from the tip
    /// stops once a block is older than `start` by more than the allowed
    /// future drift.
    pub fn block_count_in_time_range(&self, start: u32, end: u32) -> u64 {
        let Some(tip) = self.master_branch_tip() else {
            return 0;
        };

        let mut count = 0;
        let mut cursor = self.blocks.get(&tip.last_block_hash);
        while let Some(stored) = cursor {
            let time = stored.block.time();
            if time.saturating_add(MAX_FUTURE_BLOCK_TIME) < start {
                break;
            }
            if (start..=end).contains(&time) {
                count += 1;
            }
            if stored.meta.height == 0 {
                break;
            }
            cursor = self.blocks.get(stored.block.prev_block());
        }
        count
    }

    /// Get the tip block of the master branch
    pub fn last_block(&self) -> Result<&Block, ChainError> {
        let tip = self.master_branch_tip().ok_or(ChainError::Empty)?;
        self.block_by_hash(&tip.last_block_hash)
            .ok_or_else(|| ChainError::BlockNotFound(hex::encode(tip.last_block_hash)))
    }

    /// Get chain statistics
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            length: self.chain_length(),
            total_blocks: self.blocks.len() as u64,
            branches: self.branches.len(),
            latest_hash: self
                .master_branch_tip()
                .map(|tip| hex::encode(tip.last_block_hash))
                .unwrap_or_default(),
        }
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

/// Chain statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    pub length: u64,
    pub total_blocks: u64,
    pub branches: usize,
    pub latest_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{Address, OutPoint, Transaction};

    fn child(parent: &Block, time: u32, seed: u8) -> Block {
        let payout = Transaction::payout(Address::from_key_hash([seed; 20]), 1_000, time);
        Block::new(*parent.hash(), time, parent.difficulty(), vec![payout])
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = Blockchain::new();
        let tip = blockchain.master_branch_tip().unwrap();

        assert_eq!(blockchain.chain_length(), 1);
        assert_eq!(tip.last_block_hash, *Block::genesis().hash());
        assert_eq!(
            blockchain.block_meta_by_hash(Block::genesis().hash()),
            Some(BlockMeta {
                branch_id: 0,
                height: 0
            })
        );
    }

    #[test]
    fn test_empty_store() {
        let mut blockchain = Blockchain::empty();
        assert_eq!(blockchain.chain_length(), 0);
        assert!(blockchain.master_branch_tip().is_none());
        assert_eq!(blockchain.last_block().err(), Some(ChainError::Empty));

        let meta = blockchain.add_block(Block::genesis()).unwrap();
        assert_eq!(meta.height, 0);
        assert_eq!(blockchain.chain_length(), 1);
    }

    #[test]
    fn test_extend_master() {
        let mut blockchain = Blockchain::new();
        let genesis = Block::genesis();
        let first = child(&genesis, genesis.time() + 60, 1);
        let second = child(&first, genesis.time() + 120, 1);

        blockchain.add_block(first.clone()).unwrap();
        let meta = blockchain.add_block(second.clone()).unwrap();

        assert_eq!(meta, BlockMeta { branch_id: 0, height: 2 });
        assert_eq!(blockchain.chain_length(), 3);
        assert_eq!(blockchain.last_block().unwrap(), &second);

        let master = blockchain.master_branch_tip().unwrap();
        assert_eq!(master.confirmations(1), 1);
    }

    #[test]
    fn test_fork_becomes_master_when_longer() {
        let mut blockchain = Blockchain::new();
        let genesis = Block::genesis();
        let a1 = child(&genesis, genesis.time() + 60, 1);
        let a2 = child(&a1, genesis.time() + 120, 1);
        let b2 = child(&a1, genesis.time() + 121, 2);
        let b3 = child(&b2, genesis.time() + 180, 2);

        blockchain.add_block(a1.clone()).unwrap();
        blockchain.add_block(a2).unwrap();

        // Equal length fork does not take over
        let fork = blockchain.add_block(b2).unwrap();
        assert_eq!(fork.branch_id, 1);
        assert_eq!(blockchain.master_branch_tip().unwrap().id, 0);

        blockchain.add_block(b3.clone()).unwrap();
        let master = blockchain.master_branch_tip().unwrap();
        assert_eq!(master.id, 1);
        assert_eq!(master.length, 4);
        assert_eq!(master.last_block_hash, *b3.hash());

        // The fork's structure does not contain the abandoned sibling
        let structure = blockchain.branch_structure(1).unwrap();
        assert!(structure.contains_tx(b3.transactions()[0].hash()));
        assert!(structure.contains_tx(a1.transactions()[0].hash()));
        let abandoned = blockchain.branch_structure(0).unwrap();
        assert!(!abandoned.contains_tx(b3.transactions()[0].hash()));
    }

    #[test]
    fn test_blocks_in_height_order_replays() {
        let mut blockchain = Blockchain::new();
        let genesis = Block::genesis();
        let a1 = child(&genesis, genesis.time() + 60, 1);
        let a2 = child(&a1, genesis.time() + 120, 1);
        let b2 = child(&a1, genesis.time() + 121, 2);
        let b3 = child(&b2, genesis.time() + 180, 2);
        for block in [&a1, &a2, &b2, &b3] {
            blockchain.add_block(block.clone()).unwrap();
        }

        let ordered = blockchain.blocks_in_height_order();
        assert_eq!(ordered.len(), 5);
        assert_eq!(ordered[0].hash(), genesis.hash());

        let mut replayed = Blockchain::empty();
        for block in ordered {
            replayed.add_block(block.clone()).unwrap();
        }
        assert_eq!(replayed.stats(), blockchain.stats());
        assert_eq!(replayed.master_branch_tip(), blockchain.master_branch_tip());
    }

    #[test]
    fn test_branch_structure_tracks_payouts() {
        let mut blockchain = Blockchain::new();
        let genesis = Block::genesis();
        let block = child(&genesis, genesis.time() + 60, 3);
        blockchain.add_block(block.clone()).unwrap();

        let structure = blockchain.branch_structure(0).unwrap();
        let payout = &block.transactions()[0];
        let unspent = structure.unspent(&OutPoint::new(*payout.hash(), 0)).unwrap();
        assert_eq!(unspent.height, 1);
        assert!(unspent.from_payout);

        assert_eq!(
            blockchain.branch_structure(7).err(),
            Some(ChainError::UnknownBranch(7))
        );
    }

    #[test]
    fn test_block_count_in_time_range() {
        let mut blockchain = Blockchain::new();
        let genesis = Block::genesis();
        let mut parent = genesis.clone();
        for i in 1..=10u32 {
            let block = child(&parent, genesis.time() + i * 600, 1);
            blockchain.add_block(block.clone()).unwrap();
            parent = block;
        }

        let tip_time = parent.time();
        // Blocks at tip-3600 .. tip inclusive
        assert_eq!(blockchain.block_count_in_time_range(tip_time - 3600, tip_time), 7);
        assert_eq!(blockchain.block_count_in_time_range(0, u32::MAX), 11);
    }

    #[test]
    fn test_rejects_duplicates_and_orphans() {
        let mut blockchain = Blockchain::new();
        let genesis = Block::genesis();
        let block = child(&genesis, genesis.time() + 60, 1);

        blockchain.add_block(block.clone()).unwrap();
        assert!(matches!(
            blockchain.add_block(block.clone()),
            Err(ChainError::DuplicateBlock(_))
        ));

        let orphan = Block::new([9; 32], 1, 16, block.transactions().to_vec());
        assert!(matches!(
            blockchain.add_block(orphan),
            Err(ChainError::UnknownParent(_))
        ));
    }
}
