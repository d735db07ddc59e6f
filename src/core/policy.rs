//! Economic Policy
//!
//! Consensus-relevant economics used while assembling a block:
//! - Block subsidy schedule (fixed-point reward reduction)
//! - Difficulty adjustment from the trailing one hour window
//! - Minimum fee rules
//! - Payout maturity

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Number of minimal units in one coin
pub const COIN: u64 = 100_000_000;

/// Subsidy of the first era, in minimal units
pub const INITIAL_REWARD: u64 = 1_000_000_000;

/// Number of blocks between subsidy reductions
pub const REDUCE_REWARD_EVERY: u64 = 259_200;

/// Subsidy reduction factor (0.75 as an exact fraction)
pub const REDUCE_REWARD_FACTOR: RewardFactor = RewardFactor {
    numerator: 3,
    denominator: 4,
};

/// Confirmations a payout output needs before it can be spent
pub const MIN_CONFIRMATIONS: u64 = 30;

/// Absolute minimum fee for any transaction
pub const MIN_FEE: u64 = 10_000;

/// Minimum fee per byte of raw transaction data
pub const MIN_FEE_PER_BYTE: u64 = 30;

/// Width of the difficulty window in seconds
pub const DIFFICULTY_WINDOW_SECS: u32 = 3600;

/// Desired number of blocks in one difficulty window
pub const TARGET_BLOCKS_PER_HOUR: u64 = 60;

/// Difficulty is held constant for the first blocks of the chain
pub const DIFFICULTY_WARMUP_BLOCKS: u64 = 60;

/// Lowest allowed difficulty (leading zero bits)
pub const MIN_DIFFICULTY: u32 = 1;

/// Highest allowed difficulty (leading zero bits)
pub const MAX_DIFFICULTY: u32 = 255;

/// Difficulty of the genesis block
pub const GENESIS_DIFFICULTY: u32 = 16;

// =============================================================================
// Errors
// =============================================================================

/// Policy configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Reward factor denominator must be non-zero")]
    ZeroDenominator,
    #[error("Reward factor {0}/{1} must be strictly below 1")]
    FactorNotReducing(u64, u64),
    #[error("Reward reduction interval must be non-zero")]
    ZeroInterval,
}

// =============================================================================
// Reward Factor
// =============================================================================

/// Subsidy reduction factor as an exact fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardFactor {
    pub numerator: u64,
    pub denominator: u64,
}

impl RewardFactor {
    /// Apply the factor once, rounding down
    pub fn apply(&self, amount: u64) -> u64 {
        (amount as u128 * self.numerator as u128 / self.denominator as u128) as u64
    }
}

// =============================================================================
// Economic Policy
// =============================================================================

/// Process-wide economic constants, loaded once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicPolicy {
    pub initial_reward: u64,
    pub reduce_reward_every: u64,
    pub reduce_reward_factor: RewardFactor,
    pub min_confirmations: u64,
    pub min_fee: u64,
    pub min_fee_per_byte: u64,
}

impl Default for EconomicPolicy {
    fn default() -> Self {
        Self {
            initial_reward: INITIAL_REWARD,
            reduce_reward_every: REDUCE_REWARD_EVERY,
            reduce_reward_factor: REDUCE_REWARD_FACTOR,
            min_confirmations: MIN_CONFIRMATIONS,
            min_fee: MIN_FEE,
            min_fee_per_byte: MIN_FEE_PER_BYTE,
        }
    }
}

impl EconomicPolicy {
    /// Check that the constants describe a terminating, decreasing schedule
    pub fn validate(&self) -> Result<(), PolicyError> {
        let factor = self.reduce_reward_factor;
        if factor.denominator == 0 {
            return Err(PolicyError::ZeroDenominator);
        }
        if factor.numerator >= factor.denominator {
            return Err(PolicyError::FactorNotReducing(
                factor.numerator,
                factor.denominator,
            ));
        }
        if self.reduce_reward_every == 0 {
            return Err(PolicyError::ZeroInterval);
        }
        Ok(())
    }

    /// Subsidy for a block at `height`.
    ///
    /// The reduction is applied once per elapsed era with integer floor
    /// division, so every node computes the same value for every height.
    pub fn block_subsidy(&self, height: u64) -> u64 {
        let eras = height / self.reduce_reward_every.max(1);
        let mut reward = self.initial_reward;
        for _ in 0..eras {
            if reward == 0 {
                break;
            }
            reward = self.reduce_reward_factor.apply(reward);
        }
        reward
    }

    /// Difficulty for the block at `height` given the difficulty of its parent
    /// and the number of blocks found in the trailing hour.
    pub fn difficulty_adjustment(
        &self,
        height: u64,
        previous: u32,
        blocks_in_last_hour: u64,
    ) -> u32 {
        if height < DIFFICULTY_WARMUP_BLOCKS {
            return previous.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        }

        let tolerance = TARGET_BLOCKS_PER_HOUR / 10;
        let adjusted = if blocks_in_last_hour > TARGET_BLOCKS_PER_HOUR + tolerance {
            previous.saturating_add(1)
        } else if blocks_in_last_hour + tolerance < TARGET_BLOCKS_PER_HOUR {
            previous.saturating_sub(1)
        } else {
            previous
        };

        adjusted.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    }

    /// Smallest acceptable fee for a transaction of `size_bytes`
    pub fn min_fee_for(&self, size_bytes: usize) -> u64 {
        let per_byte = self.min_fee_per_byte.saturating_mul(size_bytes as u64);
        self.min_fee.max(per_byte)
    }

    /// Whether a payout output created at `output_height` may be spent by
    /// the block at `height`
    pub fn is_payout_mature(&self, output_height: u64, height: u64) -> bool {
        height.saturating_sub(output_height) >= self.min_confirmations
    }
}

/// Format an amount of minimal units as whole coins
pub fn format_coins(amount: u64) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsidy_schedule() {
        let policy = EconomicPolicy::default();

        assert_eq!(policy.block_subsidy(0), 1_000_000_000);
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY - 1), 1_000_000_000);
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY), 750_000_000);
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY * 2), 562_500_000);
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY * 3), 421_875_000);
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY * 4), 316_406_250);
        // 237_304_687.5 rounds down
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY * 5), 237_304_687);
    }

    #[test]
    fn test_subsidy_drops_by_factor_at_each_boundary() {
        let policy = EconomicPolicy::default();

        for era in 0..40 {
            let before = policy.block_subsidy(era * REDUCE_REWARD_EVERY + REDUCE_REWARD_EVERY - 1);
            let after = policy.block_subsidy((era + 1) * REDUCE_REWARD_EVERY);
            assert_eq!(after, before * 3 / 4);
        }
    }

    #[test]
    fn test_subsidy_monotonic_and_deterministic() {
        let policy = EconomicPolicy::default();
        let mut previous = u64::MAX;

        for height in (0..REDUCE_REWARD_EVERY * 120).step_by(REDUCE_REWARD_EVERY as usize / 3) {
            let subsidy = policy.block_subsidy(height);
            assert!(subsidy <= previous);
            assert_eq!(subsidy, policy.block_subsidy(height));
            previous = subsidy;
        }

        // The schedule eventually runs dry and stays dry
        assert_eq!(policy.block_subsidy(REDUCE_REWARD_EVERY * 200), 0);
        assert_eq!(policy.block_subsidy(u64::MAX), 0);
    }

    #[test]
    fn test_difficulty_adjustment() {
        let policy = EconomicPolicy::default();

        // Warmup keeps the parent difficulty
        assert_eq!(policy.difficulty_adjustment(10, 16, 500), 16);

        // Too many blocks in the last hour
        assert_eq!(policy.difficulty_adjustment(1000, 16, 80), 17);
        // Too few
        assert_eq!(policy.difficulty_adjustment(1000, 16, 20), 15);
        // Within tolerance
        assert_eq!(policy.difficulty_adjustment(1000, 16, 60), 16);
        assert_eq!(policy.difficulty_adjustment(1000, 16, 66), 16);
        assert_eq!(policy.difficulty_adjustment(1000, 16, 54), 16);

        // Bounds
        assert_eq!(policy.difficulty_adjustment(1000, MIN_DIFFICULTY, 0), MIN_DIFFICULTY);
        assert_eq!(policy.difficulty_adjustment(1000, MAX_DIFFICULTY, 1000), MAX_DIFFICULTY);
    }

    #[test]
    fn test_min_fee() {
        let policy = EconomicPolicy::default();

        // Small transactions pay the flat minimum
        assert_eq!(policy.min_fee_for(100), MIN_FEE);
        // Large transactions pay per byte
        assert_eq!(policy.min_fee_for(1000), 30_000);
    }

    #[test]
    fn test_payout_maturity() {
        let policy = EconomicPolicy::default();
        assert!(!policy.is_payout_mature(10, 39));
        assert!(policy.is_payout_mature(10, 40));
    }

    #[test]
    fn test_validate() {
        assert!(EconomicPolicy::default().validate().is_ok());

        let mut policy = EconomicPolicy::default();
        policy.reduce_reward_factor = RewardFactor {
            numerator: 1,
            denominator: 1,
        };
        assert_eq!(policy.validate(), Err(PolicyError::FactorNotReducing(1, 1)));

        policy.reduce_reward_factor.denominator = 0;
        assert_eq!(policy.validate(), Err(PolicyError::ZeroDenominator));
    }

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(1_000_000_000), "10.00000000");
        assert_eq!(format_coins(12_345), "0.00012345");
    }
}
