//! Transaction handling
//!
//! Implements the raw transaction codec, payout addresses, the synthetic
//! payout (reward) transaction and validation of pending transactions
//! against a branch structure and a block under construction.
//!
//! Raw layout (little endian):
//! - time: u32
//! - input count: u16, then per input: tx hash (32) + output index (u16)
//! - output count: u16, then per output: address (21) + amount (u64)

use crate::core::chain_state::BranchStructure;
use crate::core::policy::EconomicPolicy;
use crate::crypto::{double_sha256, Hash, HASH_LENGTH};
use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Version byte prefixed to every address
pub const ADDRESS_GROUP_ID: u8 = 40;

/// Raw address length: group id + 20 byte key hash
pub const ADDRESS_LENGTH: usize = 21;

/// Encoded size of one input
pub const INPUT_LENGTH: usize = HASH_LENGTH + 2;

/// Encoded size of one output
pub const OUTPUT_LENGTH: usize = ADDRESS_LENGTH + 8;

/// Raw size of a payout transaction with a single output
pub const PAYOUT_TX_LENGTH: usize = 4 + 2 + 2 + OUTPUT_LENGTH;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Malformed transaction: {0}")]
    Malformed(&'static str),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Too many {0}: {1}")]
    TooMany(&'static str, usize),
    #[error("Payout transactions cannot be relayed")]
    UnexpectedPayout,
    #[error("Transaction already included")]
    AlreadyIncluded,
    #[error("Input {0} is spent twice")]
    DuplicateInput(OutPoint),
    #[error("Input {0} is already spent in this block")]
    DoubleSpend(OutPoint),
    #[error("Input {0} does not exist")]
    UnknownInput(OutPoint),
    #[error("Input {0} spends an immature payout")]
    ImmaturePayout(OutPoint),
    #[error("Outputs ({outputs}) exceed inputs ({inputs})")]
    OutputsExceedInputs { inputs: u64, outputs: u64 },
    #[error("Fee too low: {fee} (min: {required})")]
    FeeTooLow { fee: u64, required: u64 },
    #[error("Amount overflow")]
    AmountOverflow,
}

// =============================================================================
// Address
// =============================================================================

/// Payout address (group id + key hash), displayed in base58
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Build an address from a 20 byte key hash
    pub fn from_key_hash(key_hash: [u8; 20]) -> Self {
        let mut raw = [0u8; ADDRESS_LENGTH];
        raw[0] = ADDRESS_GROUP_ID;
        raw[1..].copy_from_slice(&key_hash);
        Self(raw)
    }

    /// Parse raw address bytes
    pub fn from_raw(raw: &[u8]) -> Result<Self, TransactionError> {
        let raw: [u8; ADDRESS_LENGTH] = raw
            .try_into()
            .map_err(|_| TransactionError::InvalidAddress(format!("length {}", raw.len())))?;
        if raw[0] != ADDRESS_GROUP_ID {
            return Err(TransactionError::InvalidAddress(format!(
                "group id {}",
                raw[0]
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl FromStr for Address {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| TransactionError::InvalidAddress(e.to_string()))?;
        Self::from_raw(&raw)
    }
}

// =============================================================================
// Inputs & Outputs
// =============================================================================

/// Reference to an output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub tx_hash: Hash,
    pub index: u16,
}

impl OutPoint {
    pub fn new(tx_hash: Hash, index: u16) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.tx_hash), self.index)
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Address,
    pub amount: u64,
}

impl TxOutput {
    pub fn new(address: Address, amount: u64) -> Self {
        Self { address, amount }
    }
}

// =============================================================================
// Spend Context
// =============================================================================

/// What a block under construction has already consumed and created.
///
/// Validation consults it so that two transactions in the same block
/// never spend the same output, and so that a transaction may spend an
/// output created earlier in the same block.
pub trait SpendContext {
    /// Whether `outpoint` is already spent by an included transaction
    fn spends(&self, outpoint: &OutPoint) -> bool;
    /// Whether a transaction with `hash` is already included
    fn includes(&self, hash: &Hash) -> bool;
    /// Output created by an included transaction
    fn created(&self, outpoint: &OutPoint) -> Option<&TxOutput>;
}

// =============================================================================
// Transaction
// =============================================================================

/// A transaction together with its raw encoding and hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    hash: Hash,
    time: u32,
    inputs: Vec<OutPoint>,
    outputs: Vec<TxOutput>,
    raw: Vec<u8>,
}

impl Transaction {
    /// Create a transaction and compute its raw encoding
    pub fn new(
        time: u32,
        inputs: Vec<OutPoint>,
        outputs: Vec<TxOutput>,
    ) -> Result<Self, TransactionError> {
        if inputs.len() > u16::MAX as usize {
            return Err(TransactionError::TooMany("inputs", inputs.len()));
        }
        if outputs.len() > u16::MAX as usize {
            return Err(TransactionError::TooMany("outputs", outputs.len()));
        }

        let mut buf = BytesMut::with_capacity(
            4 + 2 + inputs.len() * INPUT_LENGTH + 2 + outputs.len() * OUTPUT_LENGTH,
        );
        buf.put_u32_le(time);
        buf.put_u16_le(inputs.len() as u16);
        for input in &inputs {
            buf.put_slice(&input.tx_hash);
            buf.put_u16_le(input.index);
        }
        buf.put_u16_le(outputs.len() as u16);
        for output in &outputs {
            buf.put_slice(output.address.as_bytes());
            buf.put_u64_le(output.amount);
        }

        let raw = buf.to_vec();
        Ok(Self {
            hash: double_sha256(&raw),
            time,
            inputs,
            outputs,
            raw,
        })
    }

    /// Create the payout transaction paying the whole block reward to `address`
    pub fn payout(address: Address, amount: u64, time: u32) -> Self {
        let raw = {
            let mut buf = BytesMut::with_capacity(PAYOUT_TX_LENGTH);
            buf.put_u32_le(time);
            buf.put_u16_le(0);
            buf.put_u16_le(1);
            buf.put_slice(address.as_bytes());
            buf.put_u64_le(amount);
            buf.to_vec()
        };

        Self {
            hash: double_sha256(&raw),
            time,
            inputs: Vec::new(),
            outputs: vec![TxOutput::new(address, amount)],
            raw,
        }
    }

    /// Decode a transaction from its raw encoding
    pub fn from_raw(raw: &[u8]) -> Result<Self, TransactionError> {
        let mut buf = raw;

        let time = read_u32(&mut buf)?;

        let input_count = read_u16(&mut buf)? as usize;
        if buf.remaining() < input_count * INPUT_LENGTH {
            return Err(TransactionError::Malformed("truncated inputs"));
        }
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let mut tx_hash = [0u8; HASH_LENGTH];
            buf.copy_to_slice(&mut tx_hash);
            inputs.push(OutPoint::new(tx_hash, buf.get_u16_le()));
        }

        let output_count = read_u16(&mut buf)? as usize;
        if buf.remaining() < output_count * OUTPUT_LENGTH {
            return Err(TransactionError::Malformed("truncated outputs"));
        }
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let address = Address::from_raw(&buf[..ADDRESS_LENGTH])?;
            buf.advance(ADDRESS_LENGTH);
            outputs.push(TxOutput::new(address, buf.get_u64_le()));
        }

        if buf.has_remaining() {
            return Err(TransactionError::Malformed("trailing bytes"));
        }

        Ok(Self {
            hash: double_sha256(raw),
            time,
            inputs,
            outputs,
            raw: raw.to_vec(),
        })
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn inputs(&self) -> &[OutPoint] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Size of the raw encoding in bytes
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    /// Payout transactions are the only ones without inputs
    pub fn is_payout(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Get total output amount
    pub fn total_output(&self) -> Result<u64, TransactionError> {
        self.outputs.iter().try_fold(0u64, |sum, output| {
            sum.checked_add(output.amount)
                .ok_or(TransactionError::AmountOverflow)
        })
    }

    /// Validate against the branch the block extends and the block being
    /// built. Returns the fee on success.
    ///
    /// `height` is the height of the block under construction.
    pub fn validate_in_branch(
        &self,
        structure: &BranchStructure,
        context: &impl SpendContext,
        height: u64,
        policy: &EconomicPolicy,
    ) -> Result<u64, TransactionError> {
        if self.is_payout() {
            return Err(TransactionError::UnexpectedPayout);
        }

        if structure.contains_tx(&self.hash) || context.includes(&self.hash) {
            return Err(TransactionError::AlreadyIncluded);
        }

        let mut seen = HashSet::with_capacity(self.inputs.len());
        let mut input_sum = 0u64;
        for input in &self.inputs {
            if !seen.insert(*input) {
                return Err(TransactionError::DuplicateInput(*input));
            }
            if context.spends(input) {
                return Err(TransactionError::DoubleSpend(*input));
            }

            let amount = match structure.unspent(input) {
                Some(unspent) => {
                    if unspent.from_payout && !policy.is_payout_mature(unspent.height, height) {
                        return Err(TransactionError::ImmaturePayout(*input));
                    }
                    unspent.output.amount
                }
                // Outputs of the block being built are never payouts
                None => context
                    .created(input)
                    .ok_or(TransactionError::UnknownInput(*input))?
                    .amount,
            };

            input_sum = input_sum
                .checked_add(amount)
                .ok_or(TransactionError::AmountOverflow)?;
        }

        let output_sum = self.total_output()?;
        let fee = input_sum
            .checked_sub(output_sum)
            .ok_or(TransactionError::OutputsExceedInputs {
                inputs: input_sum,
                outputs: output_sum,
            })?;

        let required = policy.min_fee_for(self.size());
        if fee < required {
            return Err(TransactionError::FeeTooLow { fee, required });
        }

        Ok(fee)
    }
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, TransactionError> {
    if buf.remaining() < 4 {
        return Err(TransactionError::Malformed("truncated header"));
    }
    Ok(buf.get_u32_le())
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, TransactionError> {
    if buf.remaining() < 2 {
        return Err(TransactionError::Malformed("truncated count"));
    }
    Ok(buf.get_u16_le())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain_state::UnspentOutput;
    use crate::core::policy::MIN_CONFIRMATIONS;

    struct EmptyContext;

    impl SpendContext for EmptyContext {
        fn spends(&self, _outpoint: &OutPoint) -> bool {
            false
        }
        fn includes(&self, _hash: &Hash) -> bool {
            false
        }
        fn created(&self, _outpoint: &OutPoint) -> Option<&TxOutput> {
            None
        }
    }

    struct SpentContext(OutPoint);

    impl SpendContext for SpentContext {
        fn spends(&self, outpoint: &OutPoint) -> bool {
            *outpoint == self.0
        }
        fn includes(&self, _hash: &Hash) -> bool {
            false
        }
        fn created(&self, _outpoint: &OutPoint) -> Option<&TxOutput> {
            None
        }
    }

    /// Block under construction that already created one output
    struct CreatedContext(OutPoint, TxOutput);

    impl SpendContext for CreatedContext {
        fn spends(&self, _outpoint: &OutPoint) -> bool {
            false
        }
        fn includes(&self, _hash: &Hash) -> bool {
            false
        }
        fn created(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
            (*outpoint == self.0).then_some(&self.1)
        }
    }

    fn address(seed: u8) -> Address {
        Address::from_key_hash([seed; 20])
    }

    fn structure_with(outpoint: OutPoint, amount: u64, from_payout: bool) -> BranchStructure {
        let mut structure = BranchStructure::default();
        structure.insert_unspent(
            outpoint,
            UnspentOutput {
                output: TxOutput::new(address(1), amount),
                height: 1,
                from_payout,
            },
        );
        structure
    }

    #[test]
    fn test_address_roundtrip() {
        let addr = address(7);
        let encoded = addr.to_string();
        assert_eq!(encoded.parse::<Address>().unwrap(), addr);

        assert!("not-base58-0OIl".parse::<Address>().is_err());
        let wrong_group = bs58::encode([1u8; ADDRESS_LENGTH]).into_string();
        assert!(matches!(
            wrong_group.parse::<Address>(),
            Err(TransactionError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_payout_transaction() {
        let payout = Transaction::payout(address(2), 1_000_000_000, 1_700_000_000);

        assert!(payout.is_payout());
        assert_eq!(payout.size(), PAYOUT_TX_LENGTH);
        assert_eq!(payout.total_output().unwrap(), 1_000_000_000);
        assert_eq!(Transaction::from_raw(payout.raw()).unwrap(), payout);
    }

    #[test]
    fn test_raw_decoding_rejects_garbage() {
        let tx = Transaction::new(
            10,
            vec![OutPoint::new([3; 32], 0)],
            vec![TxOutput::new(address(4), 5)],
        )
        .unwrap();

        let decoded = Transaction::from_raw(tx.raw()).unwrap();
        assert_eq!(decoded.hash(), tx.hash());

        let raw = tx.raw();
        assert!(Transaction::from_raw(&raw[..raw.len() - 1]).is_err());

        let mut extended = raw.to_vec();
        extended.push(0);
        assert_eq!(
            Transaction::from_raw(&extended),
            Err(TransactionError::Malformed("trailing bytes"))
        );
    }

    #[test]
    fn test_validate_returns_fee() {
        let outpoint = OutPoint::new([9; 32], 0);
        let structure = structure_with(outpoint, 100_000, false);
        let policy = EconomicPolicy::default();

        let tx = Transaction::new(1, vec![outpoint], vec![TxOutput::new(address(5), 80_000)])
            .unwrap();

        assert_eq!(
            tx.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Ok(20_000)
        );
    }

    #[test]
    fn test_validate_rejections() {
        let outpoint = OutPoint::new([9; 32], 0);
        let structure = structure_with(outpoint, 100_000, false);
        let policy = EconomicPolicy::default();

        // Fee below the flat minimum
        let cheap = Transaction::new(1, vec![outpoint], vec![TxOutput::new(address(5), 95_000)])
            .unwrap();
        assert!(matches!(
            cheap.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::FeeTooLow { fee: 5_000, .. })
        ));

        // Overspend
        let greedy = Transaction::new(1, vec![outpoint], vec![TxOutput::new(address(5), 100_001)])
            .unwrap();
        assert!(matches!(
            greedy.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::OutputsExceedInputs { .. })
        ));

        // Unknown input
        let unknown = OutPoint::new([8; 32], 1);
        let orphan = Transaction::new(1, vec![unknown], vec![TxOutput::new(address(5), 1)])
            .unwrap();
        assert_eq!(
            orphan.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::UnknownInput(unknown))
        );

        // Already spent by the block under construction
        let tx = Transaction::new(1, vec![outpoint], vec![TxOutput::new(address(5), 1)]).unwrap();
        assert_eq!(
            tx.validate_in_branch(&structure, &SpentContext(outpoint), 2, &policy),
            Err(TransactionError::DoubleSpend(outpoint))
        );

        // Same input twice
        let twice =
            Transaction::new(1, vec![outpoint, outpoint], vec![TxOutput::new(address(5), 1)])
                .unwrap();
        assert_eq!(
            twice.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::DuplicateInput(outpoint))
        );

        // Payouts never come from the mempool
        let payout = Transaction::payout(address(5), 1, 1);
        assert_eq!(
            payout.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::UnexpectedPayout)
        );
    }

    #[test]
    fn test_spends_output_created_in_same_block() {
        let structure = BranchStructure::default();
        let policy = EconomicPolicy::default();
        let parent_output = OutPoint::new([7; 32], 0);
        let context = CreatedContext(parent_output, TxOutput::new(address(6), 90_000));

        let child = Transaction::new(1, vec![parent_output], vec![TxOutput::new(address(5), 70_000)])
            .unwrap();
        assert_eq!(
            child.validate_in_branch(&structure, &context, 2, &policy),
            Ok(20_000)
        );
        assert_eq!(
            child.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::UnknownInput(parent_output))
        );
    }

    #[test]
    fn test_immature_payout_output() {
        let outpoint = OutPoint::new([9; 32], 0);
        let structure = structure_with(outpoint, 100_000, true);
        let policy = EconomicPolicy::default();

        let tx = Transaction::new(1, vec![outpoint], vec![TxOutput::new(address(5), 50_000)])
            .unwrap();

        assert_eq!(
            tx.validate_in_branch(&structure, &EmptyContext, 2, &policy),
            Err(TransactionError::ImmaturePayout(outpoint))
        );
        assert_eq!(
            tx.validate_in_branch(&structure, &EmptyContext, 1 + MIN_CONFIRMATIONS, &policy),
            Ok(50_000)
        );
    }
}
