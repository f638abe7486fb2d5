//! Execution context
//!
//! Everything a transaction needs to know about recent history: which block
//! ids it may reference, which tx ids were already included, and the
//! difficulty/cost the next block must carry.

use crate::{block::StatelessBlock, error::ChainError, genesis::Genesis, id::Id};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Blocks inside the lookback window (parent always included)
    pub recent_block_ids: HashSet<Id>,
    /// Transactions included by those blocks
    pub recent_tx_ids: HashSet<Id>,
    /// Load units consumed inside the window
    pub recent_units: u64,
    /// Difficulties of the window's blocks, newest first
    pub difficulties: Vec<u64>,
    /// Costs of the window's blocks, newest first
    pub costs: Vec<u64>,

    pub next_cost: u64,
    pub next_difficulty: u64,
}

impl ExecutionContext {
    /// Derive the context for a block built on `parent` at time `now`
    ///
    /// `lookup` resolves ancestors; a missing ancestor ends the walk.
    pub fn build<F>(
        genesis: &Genesis,
        now: u64,
        parent: &StatelessBlock,
        mut lookup: F,
    ) -> Result<Self, ChainError>
    where
        F: FnMut(&Id) -> Result<Option<StatelessBlock>, ChainError>,
    {
        let mut ctx = ExecutionContext::default();
        let mut oldest = parent.timestamp;
        ctx.absorb(genesis, parent);

        let mut height = parent.height;
        let mut next = parent.parent;
        while height > 0 {
            let Some(block) = lookup(&next)? else {
                tracing::warn!("Lookback stopped at missing ancestor {}", next);
                break;
            };
            if now.saturating_sub(block.timestamp) > genesis.lookback_window {
                break;
            }
            oldest = oldest.min(block.timestamp);
            ctx.absorb(genesis, &block);
            height = block.height;
            next = block.parent;
        }

        // Cost tracks the gap since the parent
        let since = now.saturating_sub(parent.timestamp);
        ctx.next_cost = if since < genesis.block_target {
            parent.cost.saturating_add(genesis.block_target - since)
        } else {
            parent.cost.saturating_sub(since - genesis.block_target)
        }
        .max(genesis.min_block_cost);

        // Difficulty tracks cadence and load across the window
        let blocks = ctx.recent_block_ids.len() as u64;
        let too_fast = now.saturating_sub(oldest) < blocks.saturating_mul(genesis.block_target);
        let too_busy = ctx.recent_units > genesis.target_units;
        ctx.next_difficulty = if too_fast || too_busy {
            parent.difficulty.saturating_add(1)
        } else {
            parent.difficulty.saturating_sub(1)
        }
        .max(genesis.min_difficulty);

        Ok(ctx)
    }

    fn absorb(&mut self, genesis: &Genesis, block: &StatelessBlock) {
        self.recent_block_ids.insert(block.id());
        for tx in &block.txs {
            self.recent_tx_ids.insert(tx.id());
            self.recent_units = self.recent_units.saturating_add(tx.load_units(genesis));
        }
        self.difficulties.push(block.difficulty);
        self.costs.push(block.cost);
    }

    /// Difficulty a submitter should mine to: mean of the window plus one
    pub fn difficulty_estimate(&self) -> u64 {
        if self.difficulties.is_empty() {
            return self.next_difficulty;
        }
        let total: u128 = self.difficulties.iter().map(|d| *d as u128).sum();
        let mean = (total / self.difficulties.len() as u128) as u64;
        mean.saturating_add(1).max(self.next_difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::StatefulBlock;
    use std::collections::HashMap;

    fn genesis() -> Genesis {
        Genesis {
            lookback_window: 10,
            block_target: 2,
            min_difficulty: 5,
            min_block_cost: 1,
            ..Default::default()
        }
    }

    fn child(parent: &StatelessBlock, timestamp: u64, difficulty: u64, cost: u64) -> StatelessBlock {
        StatelessBlock::new(StatefulBlock {
            parent: parent.id(),
            height: parent.height + 1,
            timestamp,
            difficulty,
            cost,
            state_root: [0u8; 32],
            txs: Vec::new(),
        })
    }

    fn chain(blocks: &[StatelessBlock]) -> HashMap<Id, StatelessBlock> {
        blocks.iter().map(|b| (b.id(), b.clone())).collect()
    }

    #[test]
    fn test_floor_when_idle() {
        let g = genesis();
        let root = StatelessBlock::genesis(&g);
        let ctx = ExecutionContext::build(&g, 1_000, &root, |_| Ok(None)).unwrap();

        assert_eq!(ctx.next_difficulty, g.min_difficulty);
        assert_eq!(ctx.next_cost, g.min_block_cost);
        assert!(ctx.recent_block_ids.contains(&root.id()));
    }

    #[test]
    fn test_rises_when_fast() {
        let g = genesis();
        let root = StatelessBlock::genesis(&g);
        let b1 = child(&root, 100, 5, 1);
        let blocks = chain(&[root.clone(), b1.clone()]);

        let first = ExecutionContext::build(&g, 100, &b1, |id| Ok(blocks.get(id).cloned())).unwrap();
        let b2 = child(&b1, 100, first.next_difficulty, first.next_cost);
        let blocks = chain(&[root, b1, b2.clone()]);
        let second = ExecutionContext::build(&g, 100, &b2, |id| Ok(blocks.get(id).cloned())).unwrap();

        assert!(first.next_difficulty > 5);
        assert!(first.next_cost > 1);
        assert!(second.next_difficulty >= first.next_difficulty);
        assert!(second.next_cost >= first.next_cost);
    }

    #[test]
    fn test_falls_toward_floor() {
        let g = genesis();
        let root = StatelessBlock::genesis(&g);
        let b1 = child(&root, 100, 9, 7);

        let ctx = ExecutionContext::build(&g, 105, &b1, |_| Ok(None)).unwrap();
        assert_eq!(ctx.next_difficulty, 8);
        // 5s gap, 2s target: cost drops by 3
        assert_eq!(ctx.next_cost, 4);

        let ctx = ExecutionContext::build(&g, 1_000, &b1, |_| Ok(None)).unwrap();
        assert_eq!(ctx.next_cost, g.min_block_cost);
    }

    #[test]
    fn test_lookback_window_bounds() {
        let g = genesis();
        let root = StatelessBlock::genesis(&g);
        let b1 = child(&root, 100, 5, 1);
        let b2 = child(&b1, 105, 5, 1);
        let b3 = child(&b2, 120, 5, 1);
        let blocks = chain(&[root.clone(), b1.clone(), b2.clone(), b3.clone()]);

        let ctx = ExecutionContext::build(&g, 125, &b3, |id| Ok(blocks.get(id).cloned())).unwrap();
        assert!(ctx.recent_block_ids.contains(&b3.id()));
        assert!(!ctx.recent_block_ids.contains(&b2.id()));

        // Parent stays referenceable even when outside the window
        let ctx = ExecutionContext::build(&g, 10_000, &b3, |id| Ok(blocks.get(id).cloned())).unwrap();
        assert_eq!(ctx.recent_block_ids.len(), 1);
    }

    #[test]
    fn test_difficulty_estimate() {
        let ctx = ExecutionContext {
            difficulties: vec![10, 20, 30],
            next_difficulty: 5,
            ..Default::default()
        };
        assert_eq!(ctx.difficulty_estimate(), 21);

        let ctx = ExecutionContext {
            difficulties: vec![10],
            next_difficulty: 50,
            ..Default::default()
        };
        assert_eq!(ctx.difficulty_estimate(), 50);
    }
}
