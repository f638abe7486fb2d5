//! Block format and verification

use crate::{
    context::ExecutionContext,
    database::{Database, VersionDb},
    error::ChainError,
    genesis::Genesis,
    id::Id,
    processor,
    transaction::Transaction,
};
use borsh::{BorshDeserialize, BorshSerialize};
use std::{ops::Deref, sync::Arc};

/// Block content as encoded on the wire and on disk
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct StatefulBlock {
    pub parent: Id,
    pub height: u64,
    /// Unix seconds
    pub timestamp: u64,
    /// Minimum work every included transaction must carry
    pub difficulty: u64,
    /// Surplus work the block must carry, in multiples of `difficulty`
    pub cost: u64,
    /// Commitment to the staged change set produced by the block
    pub state_root: [u8; 32],
    pub txs: Vec<Transaction>,
}

/// A block together with its encoding and id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatelessBlock {
    block: StatefulBlock,
    id: Id,
    bytes: Vec<u8>,
}

impl StatelessBlock {
    pub fn new(block: StatefulBlock) -> Self {
        let bytes = borsh::to_vec(&block).expect("StatefulBlock serialization should not fail");
        let id = Id::hash(&bytes);
        Self { block, id, bytes }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ChainError> {
        let block: StatefulBlock = borsh::from_slice(bytes)?;
        Ok(Self {
            block,
            id: Id::hash(bytes),
            bytes: bytes.to_vec(),
        })
    }

    /// Height-zero block carrying the genesis floors
    pub fn genesis(genesis: &Genesis) -> Self {
        Self::new(StatefulBlock {
            parent: Id::EMPTY,
            height: 0,
            timestamp: genesis.timestamp,
            difficulty: genesis.min_difficulty,
            cost: genesis.min_block_cost,
            state_root: [0u8; 32],
            txs: Vec::new(),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_inner(self) -> StatefulBlock {
        self.block
    }
}

impl Deref for StatelessBlock {
    type Target = StatefulBlock;

    fn deref(&self) -> &StatefulBlock {
        &self.block
    }
}

/// Work carried above `difficulty`, weighted by fee units
pub fn surplus_work(genesis: &Genesis, txs: &[Transaction], difficulty: u64) -> u128 {
    txs.iter()
        .map(|tx| tx.work().saturating_sub(difficulty) as u128 * tx.fee_units(genesis) as u128)
        .sum()
}

/// A block must carry at least `difficulty * cost` surplus work
pub fn check_surplus(
    genesis: &Genesis,
    txs: &[Transaction],
    difficulty: u64,
    cost: u64,
) -> Result<(), ChainError> {
    let surplus = surplus_work(genesis, txs, difficulty);
    let required = difficulty as u128 * cost as u128;
    if surplus < required {
        return Err(ChainError::InsufficientSurplus { surplus, required });
    }
    Ok(())
}

/// Re-execute `block` on top of `parent_db`
///
/// `ctx` must be built from the block's parent at the block's timestamp.
/// Returns the staged view holding the block's changes; nothing is
/// committed.
pub fn verify(
    genesis: &Genesis,
    block: &StatelessBlock,
    parent: &StatelessBlock,
    parent_db: Arc<dyn Database>,
    ctx: &ExecutionContext,
    max_timestamp: u64,
) -> Result<Arc<VersionDb>, ChainError> {
    if block.parent != parent.id() || block.height != parent.height + 1 {
        return Err(ChainError::InvalidHeight {
            expected: parent.height + 1,
            found: block.height,
        });
    }
    if block.timestamp < parent.timestamp {
        return Err(ChainError::InvalidTimestamp(format!(
            "{} before parent {}",
            block.timestamp, parent.timestamp
        )));
    }
    if block.timestamp > max_timestamp {
        return Err(ChainError::InvalidTimestamp(format!(
            "{} too far in the future (max {})",
            block.timestamp, max_timestamp
        )));
    }
    if block.difficulty != ctx.next_difficulty {
        return Err(ChainError::InvalidDifficulty {
            expected: ctx.next_difficulty,
            found: block.difficulty,
        });
    }
    if block.cost != ctx.next_cost {
        return Err(ChainError::InvalidCost {
            expected: ctx.next_cost,
            found: block.cost,
        });
    }
    if block.txs.is_empty() {
        return Err(ChainError::NoTxs);
    }

    let state = Arc::new(VersionDb::new(parent_db));
    for tx in &block.txs {
        tx.validate(genesis)?;
        processor::execute(tx, genesis, state.as_ref(), block.timestamp, ctx)?;
    }
    check_surplus(genesis, &block.txs, block.difficulty, block.cost)?;

    if state.commitment() != block.state_root {
        return Err(ChainError::StateRootMismatch);
    }
    Ok(state)
}
