//! Genesis parameters
//!
//! Fixed for the lifetime of the chain. All fee computation is a pure
//! function of these values and transaction content.

use crate::error::ChainError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Genesis {
    /// Chain identifier every transaction must carry
    pub magic: u64,
    /// Timestamp of the genesis block (unix seconds)
    pub timestamp: u64,

    // Tx params
    /// Units charged for every transaction
    pub base_tx_units: u64,

    // SetTx params
    /// Bytes per value unit
    pub value_unit_size: u64,
    /// Maximum value length in bytes
    pub max_value_size: u64,

    // Claim params
    pub claim_fee_multiplier: u64,
    pub claim_tier3_multiplier: u64,
    pub claim_tier2_size: u64,
    pub claim_tier2_multiplier: u64,
    pub claim_tier1_size: u64,
    pub claim_tier1_multiplier: u64,

    // Lifeline params
    /// Divisor applied to prefix units when the owner renews
    pub prefix_renewal_discount: u64,

    // Reward params
    /// Lease lifetime granted by a claim (seconds)
    pub claim_reward: u64,
    /// Lifetime bought by one lifeline unit (seconds)
    pub lifeline_unit_reward: u64,

    // Fee mechanism params
    /// Seconds of history considered when computing the next difficulty
    pub lookback_window: u64,
    /// Target seconds between blocks
    pub block_target: u64,
    /// Fee units per lookback window above which difficulty rises
    pub target_units: u64,
    /// Difficulty floor
    pub min_difficulty: u64,
    /// Block cost floor
    pub min_block_cost: u64,
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            magic: 1,
            timestamp: 0,

            base_tx_units: 10,

            value_unit_size: 256,          // 256B
            max_value_size: 128 * 1024, // 128 KiB

            claim_fee_multiplier: 5,
            claim_tier3_multiplier: 1,
            claim_tier2_size: 36,
            claim_tier2_multiplier: 5,
            claim_tier1_size: 12,
            claim_tier1_multiplier: 25,

            prefix_renewal_discount: 5,

            claim_reward: 60 * 60 * 24 * 15, // 15 days
            lifeline_unit_reward: 60 * 60,   // 1 hour per unit

            lookback_window: 60,          // 60 seconds
            block_target: 1,              // 1 block per second
            target_units: 10 * 512 * 60,  // 10 units per tx * 512 txs per block * 60 seconds
            min_difficulty: 100,
            min_block_cost: 1,
        }
    }
}

impl Genesis {
    /// Reject parameter sets that would make fee or expiry math undefined
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.value_unit_size == 0 {
            return Err(ChainError::InvalidGenesis("valueUnitSize must be > 0".into()));
        }
        if self.prefix_renewal_discount == 0 {
            return Err(ChainError::InvalidGenesis(
                "prefixRenewalDiscount must be > 0".into(),
            ));
        }
        if self.block_target == 0 {
            return Err(ChainError::InvalidGenesis("blockTarget must be > 0".into()));
        }
        if self.min_difficulty == 0 {
            return Err(ChainError::InvalidGenesis("minDifficulty must be > 0".into()));
        }
        if self.claim_tier1_size > self.claim_tier2_size {
            return Err(ChainError::InvalidGenesis(
                "claimTier1Size must not exceed claimTier2Size".into(),
            ));
        }
        Ok(())
    }
}
