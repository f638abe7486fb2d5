//! Expired lease pruning
//!
//! Runs on its own timer. A tick that hits the batch limit is followed by
//! a short tick so a backlog drains quickly, otherwise the regular interval
//! applies.

use crate::{config::VmConfig, error::VmError, vm::Vm};
use lease_program::{state, Database, VersionDb};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

impl Vm {
    /// Remove up to `prune_limit` expired leases
    ///
    /// Returns the number of index entries processed.
    pub fn prune(&self) -> Result<usize, VmError> {
        let _guard = self.ctx_lock.lock();

        let staged = VersionDb::new(self.db.clone());
        let removals = match state::prune_next(&staged, self.clock.now(), self.config.prune_limit) {
            Ok(removals) => removals,
            Err(e) => {
                staged.abort();
                return Err(e.into());
            }
        };
        if let Err(e) = staged.commit() {
            staged.abort();
            return Err(e.into());
        }

        // Pending children of the last accepted block read through the base
        let updated = self.chain.read().set_children_db();
        if removals > 0 {
            tracing::debug!("Pruned {} expired leases ({} pending children)", removals, updated);
        }
        Ok(removals)
    }
}

/// Delay before the next prune tick given the outcome of this one
pub(crate) fn next_delay(config: &VmConfig, outcome: &Result<usize, VmError>) -> Duration {
    match outcome {
        Ok(removals) if *removals >= config.prune_limit => config.full_prune_interval(),
        Ok(_) => config.prune_interval(),
        Err(e) => {
            tracing::warn!("Prune failed: {}", e);
            config.prune_interval()
        }
    }
}

/// Prune loop; exits when `stop` flips to `true`
pub async fn run_pruner(vm: Arc<Vm>, mut stop: watch::Receiver<bool>) {
    let mut delay = vm.config.prune_interval();
    tracing::debug!("Pruner started ({}ms interval)", vm.config.prune_interval_ms);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                delay = next_delay(&vm.config, &vm.prune());
            }
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }
    }

    tracing::debug!("Pruner stopped");
}
