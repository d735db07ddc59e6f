//! Mining task
//!
//! The snapshot external proof-of-work workers poll. A task is either
//! inactive (no fields populated) or complete.

use crate::mining::template::BlockTemplate;
use crate::mining::TemplateError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Published candidate block descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningTask {
    pub active: bool,
    /// Length of the raw header at the start of `block_data`
    pub header_byte_length: usize,
    /// Raw block bytes, base64
    pub block_data: String,
    /// Transaction hashes in block order, base58
    pub tx_hash_list: Vec<String>,
    /// Subsidy plus fees
    pub reward: u64,
}

impl MiningTask {
    /// Task telling workers there is nothing to mine
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Snapshot a serialized template
    pub fn from_template(template: &BlockTemplate, reward: u64) -> Result<Self, TemplateError> {
        if template.raw().is_empty() {
            return Err(TemplateError::MissingPayout);
        }

        Ok(Self {
            active: true,
            header_byte_length: template.header_length(),
            block_data: STANDARD.encode(template.raw()),
            tx_hash_list: template
                .tx_hashes()
                .iter()
                .map(|hash| bs58::encode(hash).into_string())
                .collect(),
            reward,
        })
    }

    /// Decode `block_data`
    pub fn block_bytes(&self) -> Option<Vec<u8>> {
        STANDARD.decode(&self.block_data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, Block, OutPoint, Transaction, TxOutput, MAX_BLOCK_SIZE};

    #[test]
    fn test_inactive_task_is_empty() {
        let task = MiningTask::inactive();
        assert!(!task.active);
        assert!(task.block_data.is_empty());
        assert!(task.tx_hash_list.is_empty());
        assert_eq!(task.reward, 0);
    }

    #[test]
    fn test_from_template() {
        let mut template = BlockTemplate::create();
        assert!(MiningTask::from_template(&template, 0).is_err());

        let payout = Transaction::payout(Address::from_key_hash([1; 20]), 700, 5);
        template.set_prev_block([2; 32]);
        template.set_time(5);
        template.set_difficulty(10);
        template.add_first_transaction(payout.clone()).unwrap();
        template.serialize().unwrap();

        let task = MiningTask::from_template(&template, 700).unwrap();
        assert!(task.active);
        assert_eq!(task.header_byte_length, 85);
        assert_eq!(task.reward, 700);
        assert_eq!(task.tx_hash_list, vec![bs58::encode(payout.hash()).into_string()]);

        let block = Block::from_raw(&task.block_bytes().unwrap()).unwrap();
        assert_eq!(block.payout_tx(), Some(&payout));

        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(serde_json::from_str::<MiningTask>(&json).unwrap(), task);
    }

    #[test]
    fn test_full_size_block_data() {
        let mut template = BlockTemplate::create();
        template.set_prev_block([2; 32]);
        template.set_time(5);

        // ~100 KB transactions until the block is full
        let mut seed = 0u8;
        loop {
            let tx = Transaction::new(
                1,
                vec![OutPoint::new([seed; 32], 0)],
                vec![TxOutput::new(Address::from_key_hash([1; 20]), 1); 3_500],
            )
            .unwrap();
            if !template.has_room_for(tx.size()) {
                break;
            }
            template.add_transaction(tx).unwrap();
            seed += 1;
        }
        template
            .add_first_transaction(Transaction::payout(Address::from_key_hash([1; 20]), 1, 5))
            .unwrap();
        let raw = template.serialize().unwrap().to_vec();
        assert!(raw.len() > MAX_BLOCK_SIZE - 110_000);

        let task = MiningTask::from_template(&template, 1).unwrap();
        assert_eq!(task.block_data.len(), (raw.len() + 2) / 3 * 4);
        assert_eq!(task.block_bytes().unwrap(), raw);
        assert_eq!(task.tx_hash_list.len(), usize::from(seed) + 1);
    }
}
