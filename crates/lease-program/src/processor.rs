//! Lease Program Processor
//!
//! Applies a transaction to a staged database view. The caller owns the
//! view and commits it only when this returns `Ok`.

use crate::{
    context::ExecutionContext,
    database::Database,
    error::ChainError,
    genesis::Genesis,
    state::{self, PrefixInfo},
    transaction::{value_units, ClaimTx, DeleteTx, LifelineTx, SetTx, Transaction, UnsignedTransaction},
};

/// Execute a transaction at `block_time`
///
/// Base checks run first (recent block reference, replay, proof-of-work,
/// fee budget), then the variant mutation, then the tx id is recorded as
/// confirmed.
pub fn execute(
    tx: &Transaction,
    genesis: &Genesis,
    db: &dyn Database,
    block_time: u64,
    ctx: &ExecutionContext,
) -> Result<(), ChainError> {
    let base = tx.base();
    if !ctx.recent_block_ids.contains(&base.block_id) {
        return Err(ChainError::StaleBlockId);
    }

    let id = tx.id();
    if ctx.recent_tx_ids.contains(&id) || state::has_transaction(db, &id)? {
        return Err(ChainError::DuplicateTx);
    }

    let work = tx.work();
    if work < ctx.next_difficulty {
        return Err(ChainError::PoWFailed {
            difficulty: work,
            required: ctx.next_difficulty,
        });
    }

    let required = tx.fee_units(genesis);
    if required > base.max_units {
        return Err(ChainError::InsufficientFee {
            required,
            budget: base.max_units,
        });
    }

    match &tx.unsigned {
        UnsignedTransaction::Claim(claim) => execute_claim(genesis, db, block_time, claim)?,
        UnsignedTransaction::Lifeline(lifeline) => {
            execute_lifeline(genesis, db, block_time, lifeline)?
        }
        UnsignedTransaction::Set(set) => execute_set(genesis, db, block_time, set)?,
        UnsignedTransaction::Delete(delete) => execute_delete(genesis, db, block_time, delete)?,
    }

    state::put_transaction(db, &id)
}

impl Transaction {
    /// Apply this transaction to a staged view; see [`execute`]
    pub fn execute(
        &self,
        genesis: &Genesis,
        db: &dyn Database,
        block_time: u64,
        ctx: &ExecutionContext,
    ) -> Result<(), ChainError> {
        execute(self, genesis, db, block_time, ctx)
    }
}

/// Lease held by `sender` that has not yet expired
fn owned_lease(
    db: &dyn Database,
    prefix: &str,
    sender: &[u8; 32],
    now: u64,
) -> Result<PrefixInfo, ChainError> {
    let info = match state::get_prefix_info(db, prefix.as_bytes())? {
        Some(info) if info.is_active(now) => info,
        _ => return Err(ChainError::PrefixMissing),
    };
    if &info.owner != sender {
        return Err(ChainError::Unauthorized);
    }
    Ok(info)
}

fn execute_claim(
    genesis: &Genesis,
    db: &dyn Database,
    block_time: u64,
    tx: &ClaimTx,
) -> Result<(), ChainError> {
    let prefix = tx.base.prefix.as_bytes();

    if let Some(existing) = state::get_prefix_info(db, prefix)? {
        if existing.is_active(block_time) {
            return Err(ChainError::PrefixNotExpired);
        }
        // Expired but not yet pruned: the new holder starts from an empty namespace
        state::delete_prefix_info(db, prefix)?;
        tracing::debug!("Claim replaced expired prefix {}", tx.base.prefix);
    }

    let info = PrefixInfo::new(tx.base.sender, block_time, genesis.claim_reward);
    state::put_prefix_info(db, prefix, &info, info.expiry)
}

fn execute_lifeline(
    genesis: &Genesis,
    db: &dyn Database,
    block_time: u64,
    tx: &LifelineTx,
) -> Result<(), ChainError> {
    if tx.units == 0 {
        return Err(ChainError::InvalidUnits);
    }

    let mut info = owned_lease(db, &tx.base.prefix, &tx.base.sender, block_time)?;
    let last_expiry = info.expiry;
    let reward = genesis.lifeline_unit_reward.saturating_mul(tx.units);
    info.extend(reward, block_time)?;

    state::put_prefix_info(db, tx.base.prefix.as_bytes(), &info, last_expiry)
}

fn execute_set(
    genesis: &Genesis,
    db: &dyn Database,
    block_time: u64,
    tx: &SetTx,
) -> Result<(), ChainError> {
    let prefix = tx.base.prefix.as_bytes();
    let mut info = owned_lease(db, &tx.base.prefix, &tx.base.sender, block_time)?;
    let last_expiry = info.expiry;

    let mut units = info.units;
    if let Some(previous) = state::get_value(db, prefix, tx.key.as_bytes())? {
        units = units.saturating_sub(value_units(genesis, previous.len()));
    }
    units = units.saturating_add(value_units(genesis, tx.value.len()));

    state::put_value(db, prefix, tx.key.as_bytes(), &tx.value)?;
    info.set_units(units, block_time);
    state::put_prefix_info(db, prefix, &info, last_expiry)
}

fn execute_delete(
    genesis: &Genesis,
    db: &dyn Database,
    block_time: u64,
    tx: &DeleteTx,
) -> Result<(), ChainError> {
    let prefix = tx.base.prefix.as_bytes();
    let mut info = owned_lease(db, &tx.base.prefix, &tx.base.sender, block_time)?;
    let last_expiry = info.expiry;

    let previous = state::get_value(db, prefix, tx.key.as_bytes())?.ok_or(ChainError::KeyMissing)?;
    let units = info.units.saturating_sub(value_units(genesis, previous.len()));

    state::delete_value(db, prefix, tx.key.as_bytes())?;
    info.set_units(units, block_time);
    state::put_prefix_info(db, prefix, &info, last_expiry)
}
