//! Transaction gossip
//!
//! The transport is behind [`GossipSender`]; this module decides what to
//! send. Pending transactions are re-sent every regossip interval unless
//! they were confirmed or recently gossiped.

use crate::{error::GossipError, vm::Vm};
use borsh::{BorshDeserialize, BorshSerialize};
use lease_program::{state, Id, Transaction};
use lru::LruCache;
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::sync::watch;

/// Outbound side of the peer network
pub trait GossipSender: Send + Sync {
    fn send_app_gossip(&self, msg: Vec<u8>) -> Result<(), GossipError>;
}

/// Sender for nodes running without peers
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGossip;

impl GossipSender for NoopGossip {
    fn send_app_gossip(&self, _msg: Vec<u8>) -> Result<(), GossipError> {
        Ok(())
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct GossipMessage {
    pub txs: Vec<Transaction>,
}

impl GossipMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("GossipMessage serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, GossipError> {
        borsh::from_slice(data).map_err(|e| GossipError::Decode(e.to_string()))
    }
}

pub struct Gossiper {
    sender: Arc<dyn GossipSender>,
    /// Recently gossiped tx ids
    gossiped: Mutex<LruCache<Id, ()>>,
}

impl Gossiper {
    pub fn new(sender: Arc<dyn GossipSender>, cache_size: usize) -> Self {
        let size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            sender,
            gossiped: Mutex::new(LruCache::new(size)),
        }
    }

    /// Send the transactions not seen recently, in one message
    ///
    /// Returns how many were sent.
    pub fn gossip(&self, txs: Vec<Transaction>) -> Result<usize, GossipError> {
        let fresh: Vec<Transaction> = {
            let gossiped = self.gossiped.lock();
            txs.into_iter().filter(|tx| !gossiped.contains(&tx.id())).collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Id> = fresh.iter().map(|tx| tx.id()).collect();
        self.sender
            .send_app_gossip(GossipMessage { txs: fresh }.to_bytes())?;

        let mut gossiped = self.gossiped.lock();
        for id in &ids {
            gossiped.put(*id, ());
        }
        Ok(ids.len())
    }

    pub fn was_gossiped(&self, id: &Id) -> bool {
        self.gossiped.lock().contains(id)
    }
}

impl Vm {
    /// One regossip pass over the mempool
    pub fn regossip_txs(&self) -> Result<usize, GossipError> {
        let pending: Vec<Transaction> = self
            .mempool
            .lock()
            .transactions()
            .into_iter()
            .filter(|tx| match state::has_transaction(self.db.as_ref(), &tx.id()) {
                Ok(confirmed) => !confirmed,
                Err(e) => {
                    tracing::warn!("Confirmation lookup for {} failed: {}", tx.id(), e);
                    true
                }
            })
            .collect();
        let sent = self.gossiper.gossip(pending)?;
        if sent > 0 {
            tracing::debug!("Regossiped {} transactions", sent);
        }
        Ok(sent)
    }
}

/// Regossip loop; exits when `stop` flips to `true`
pub async fn run_regossip(vm: Arc<Vm>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(vm.config.regossip_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    interval.tick().await;

    tracing::debug!(
        "Regossip loop started ({}ms interval)",
        vm.config.regossip_interval_ms
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = vm.regossip_txs() {
                    tracing::warn!("Regossip failed: {}", e);
                }
            }
            _ = stop.changed() => break,
        }
        if *stop.borrow() {
            break;
        }
    }

    tracing::debug!("Regossip loop stopped");
}
