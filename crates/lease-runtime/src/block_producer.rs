//! Block Producer - single-node driver
//!
//! Stands in for consensus on a node running alone: whenever the mempool
//! holds transactions it builds a block on the preferred head, prefers it
//! and accepts it.

use crate::{error::VmError, vm::Vm};
use lease_program::{ChainError, Id};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, watch};

/// Default block time in milliseconds
pub const BLOCK_TIME_MS: u64 = 1_000;

/// Block update event sent to subscribers
#[derive(Clone, Debug)]
pub struct BlockUpdate {
    pub id: Id,
    pub height: u64,
    pub timestamp: u64,
    pub difficulty: u64,
    pub cost: u64,
    /// Number of transactions included
    pub transaction_count: usize,
    /// Build-to-accept time in microseconds
    pub processing_time_us: u64,
}

/// Block producer configuration
#[derive(Clone, Debug)]
pub struct BlockProducerConfig {
    /// Time between build attempts
    pub block_time_ms: u64,
    /// Log every produced block at info
    pub verbose: bool,
}

impl Default for BlockProducerConfig {
    fn default() -> Self {
        Self {
            block_time_ms: BLOCK_TIME_MS,
            verbose: false,
        }
    }
}

pub struct BlockProducer {
    vm: Arc<Vm>,
    /// Block update broadcaster
    update_sender: broadcast::Sender<BlockUpdate>,
    config: BlockProducerConfig,
    /// Running flag
    running: Arc<AtomicBool>,
}

impl BlockProducer {
    pub fn new(vm: Arc<Vm>, config: BlockProducerConfig) -> Self {
        let (update_sender, _) = broadcast::channel(64);
        Self {
            vm,
            update_sender,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to block updates
    pub fn subscribe(&self) -> broadcast::Receiver<BlockUpdate> {
        self.update_sender.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Build, prefer and accept one block
    ///
    /// Returns `None` when there was nothing to include.
    pub fn produce(&self) -> Result<Option<BlockUpdate>, VmError> {
        let start = Instant::now();
        let block = match self.vm.build_block() {
            Ok(block) => block,
            Err(VmError::Chain(ChainError::NoTxs)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let id = block.id();
        self.vm.set_preference(id)?;
        self.vm.accept_block(&id)?;

        let update = BlockUpdate {
            id,
            height: block.height,
            timestamp: block.timestamp,
            difficulty: block.difficulty,
            cost: block.cost,
            transaction_count: block.txs.len(),
            processing_time_us: start.elapsed().as_micros() as u64,
        };

        // Ignore errors if no subscribers
        let _ = self.update_sender.send(update.clone());
        Ok(Some(update))
    }

    /// Run until `stop` flips to `true`
    pub async fn run_async(self, mut stop: watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);

        let block_duration = Duration::from_millis(self.config.block_time_ms);
        let mut interval = tokio::time::interval(block_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("Block producer started ({}ms blocks)", self.config.block_time_ms);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }
            if self.vm.mempool_len() == 0 {
                continue;
            }

            match self.produce() {
                Ok(Some(update)) => {
                    if self.config.verbose {
                        tracing::info!(
                            "Block {} | height {} | {} txs | difficulty {} | cost {} | {:.2}ms",
                            update.id,
                            update.height,
                            update.transaction_count,
                            update.difficulty,
                            update.cost,
                            update.processing_time_us as f64 / 1000.0
                        );
                    }
                    if Duration::from_micros(update.processing_time_us) > block_duration {
                        tracing::warn!(
                            "Block {} took {:.2}ms (target: {}ms)",
                            update.height,
                            update.processing_time_us as f64 / 1000.0,
                            self.config.block_time_ms
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Block production failed: {}", e),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Block producer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, config::VmConfig, gossip::NoopGossip};
    use ed25519_dalek::SigningKey;
    use lease_program::{BaseTx, ClaimTx, Genesis, MemoryDatabase, UnsignedTransaction};

    fn producer() -> BlockProducer {
        let genesis = Genesis {
            min_difficulty: 2,
            ..Default::default()
        };
        let vm = Vm::new(
            genesis,
            VmConfig::default(),
            Arc::new(MemoryDatabase::new()),
            Arc::new(ManualClock::new(100)),
            Arc::new(NoopGossip),
        )
        .unwrap();
        BlockProducer::new(
            Arc::new(vm),
            BlockProducerConfig {
                block_time_ms: 10,
                verbose: true,
            },
        )
    }

    fn submit_claim(vm: &Vm, prefix: &str) {
        let key = SigningKey::from_bytes(&[6u8; 32]);
        let mut unsigned = UnsignedTransaction::Claim(ClaimTx {
            base: BaseTx {
                sender: key.verifying_key().to_bytes(),
                block_id: vm.preferred(),
                prefix: prefix.to_string(),
                magic: vm.genesis().magic,
                max_units: u64::MAX,
                graffiti: 0,
            },
        });
        unsigned.mine(vm.difficulty_estimate().unwrap() * 4);
        vm.issue_tx(&unsigned.sign(&key).to_bytes()).unwrap();
    }

    #[test]
    fn test_produce_accepts_block() {
        let producer = producer();
        assert!(producer.produce().unwrap().is_none());

        let mut updates = producer.subscribe();
        submit_claim(&producer.vm, "abc");
        let update = producer.produce().unwrap().unwrap();

        assert_eq!(update.height, 1);
        assert_eq!(update.transaction_count, 1);
        assert_eq!(producer.vm.last_accepted(), update.id);
        assert_eq!(producer.vm.mempool_len(), 0);
        assert_eq!(updates.try_recv().unwrap().id, update.id);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let producer = producer();
        let vm = producer.vm.clone();
        let running = producer.running.clone();
        let mut updates = producer.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(producer.run_async(stop_rx));
        submit_claim(&vm, "abc");

        let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.height, 1);
        assert!(running.load(Ordering::SeqCst));

        stop_tx.send_replace(true);
        handle.await.unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }
}
