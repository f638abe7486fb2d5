//! VM configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum pending transactions
    pub mempool_size: usize,
    /// Maximum expired leases removed per prune tick
    pub prune_limit: usize,
    /// Prune tick when the last tick left nothing behind
    pub prune_interval_ms: u64,
    /// Prune tick while a backlog remains
    pub full_prune_interval_ms: u64,
    pub regossip_interval_ms: u64,
    /// Recently gossiped tx ids remembered to avoid re-sending
    pub gossiped_cache_size: usize,
    pub max_block_txs: usize,
    /// Maximum fee units per block
    pub max_block_units: u64,
    /// Seconds a block timestamp may run ahead of the local clock
    pub future_bound: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            mempool_size: 1024,
            prune_limit: 128,
            prune_interval_ms: 60_000,
            full_prune_interval_ms: 1_000,
            regossip_interval_ms: 30_000,
            gossiped_cache_size: 512,
            max_block_txs: 512,
            max_block_units: 256 * 1024,
            future_bound: 10,
        }
    }
}

impl VmConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn full_prune_interval(&self) -> Duration {
        Duration::from_millis(self.full_prune_interval_ms)
    }

    pub fn regossip_interval(&self) -> Duration {
        Duration::from_millis(self.regossip_interval_ms)
    }
}
