//! Block Builder
//!
//! Assembles a candidate block from the mempool on top of a parent's state.
//! Each transaction runs in its own staged view so a failure leaves the
//! block's view untouched.

use crate::{config::VmConfig, mempool::Mempool};
use lease_program::{
    block::check_surplus, ChainError, Database, ExecutionContext, Genesis,
    StatefulBlock, StatelessBlock, Transaction, VersionDb,
};
use std::sync::Arc;

pub struct BlockBuilder<'a> {
    genesis: &'a Genesis,
    config: &'a VmConfig,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(genesis: &'a Genesis, config: &'a VmConfig) -> Self {
        Self { genesis, config }
    }

    /// Build a child of `parent` at `timestamp`
    ///
    /// Drains the mempool in priority order. Transactions that fail with a
    /// retryable error go back to the mempool, the rest are dropped. The
    /// returned view holds the block's uncommitted changes.
    pub fn build(
        &self,
        mempool: &mut Mempool,
        parent: &StatelessBlock,
        parent_state: Arc<dyn Database>,
        ctx: &ExecutionContext,
        timestamp: u64,
    ) -> Result<(StatelessBlock, Arc<VersionDb>), ChainError> {
        let state = Arc::new(VersionDb::new(parent_state));
        let mut txs: Vec<Transaction> = Vec::new();
        let mut retry: Vec<Transaction> = Vec::new();
        let mut units: u64 = 0;

        while txs.len() < self.config.max_block_txs {
            let Some(next) = mempool.peek_max() else {
                break;
            };
            let fee = next.fee_units(self.genesis);
            if fee > self.config.max_block_units {
                if let Some(tx) = mempool.pop_max() {
                    tracing::debug!("Dropping tx {}: {} units never fit a block", tx.id(), fee);
                }
                continue;
            }
            if units.saturating_add(fee) > self.config.max_block_units {
                break;
            }
            let Some(tx) = mempool.pop_max() else {
                break;
            };

            let staged = VersionDb::new(state.clone());
            let result = tx.validate(self.genesis).and_then(|_| {
                tx.execute(self.genesis, &staged, timestamp, ctx)
            });
            match result {
                Ok(()) => {
                    staged.commit()?;
                    units += fee;
                    txs.push(tx);
                }
                Err(e) => {
                    staged.abort();
                    if e.is_retryable() {
                        tracing::debug!("Deferring tx {}: {}", tx.id(), e);
                        retry.push(tx);
                    } else {
                        tracing::debug!("Dropping tx {}: {}", tx.id(), e);
                    }
                }
            }
        }

        for tx in retry {
            mempool.add(tx);
        }

        if txs.is_empty() {
            return Err(ChainError::NoTxs);
        }
        if let Err(e) = check_surplus(self.genesis, &txs, ctx.next_difficulty, ctx.next_cost) {
            for tx in txs {
                mempool.add(tx);
            }
            return Err(e);
        }

        let block = StatelessBlock::new(StatefulBlock {
            parent: parent.id(),
            height: parent.height + 1,
            timestamp,
            difficulty: ctx.next_difficulty,
            cost: ctx.next_cost,
            state_root: state.commitment(),
            txs,
        });

        tracing::debug!(
            "Built block {} at height {} ({} txs, {} units)",
            block.id(),
            block.height,
            block.txs.len(),
            units
        );
        Ok((block, state))
    }
}
