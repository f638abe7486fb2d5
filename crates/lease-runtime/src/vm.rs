//! VM Runtime
//!
//! Owns the ledger handle, mempool and chain index, and exposes the
//! block lifecycle driven by consensus: build, verify, accept, reject,
//! preference. Background pruning and regossip run as tokio tasks that
//! stop on [`Vm::shutdown`].

use crate::{
    block_builder::BlockBuilder,
    chain_index::ChainIndex,
    clock::Clock,
    config::VmConfig,
    error::VmError,
    gossip::{self, GossipMessage, GossipSender, Gossiper},
    mempool::Mempool,
    pruner,
};
use lease_program::{
    block, state, ChainError, Database, ExecutionContext, Genesis, Id, PrefixInfo,
    StatelessBlock, Transaction, VersionDb,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};

pub struct Vm {
    pub(crate) genesis: Genesis,
    pub(crate) config: VmConfig,
    /// Durable base database
    pub(crate) db: Arc<dyn Database>,
    pub(crate) clock: Arc<dyn Clock>,
    /// Serialises build, verify, accept, reject, submit and prune
    pub(crate) ctx_lock: Mutex<()>,
    pub(crate) mempool: Mutex<Mempool>,
    pub(crate) chain: RwLock<ChainIndex>,
    pub(crate) gossiper: Gossiper,
    stop: watch::Sender<bool>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Vm {
    /// Initialize from `db`, writing the genesis block on first start
    pub fn new(
        genesis: Genesis,
        config: VmConfig,
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn GossipSender>,
    ) -> Result<Self, VmError> {
        genesis
            .verify()
            .map_err(|e| VmError::Genesis(e.to_string()))?;

        let last_accepted = match state::get_last_accepted(db.as_ref())? {
            Some(id) => {
                let bytes = state::get_block_bytes(db.as_ref(), &id)?
                    .ok_or(VmError::BlockNotFound(id))?;
                let block = StatelessBlock::parse(&bytes)?;
                tracing::info!(
                    "Loaded last accepted block {} at height {}",
                    block.id(),
                    block.height
                );
                block
            }
            None => {
                let block = StatelessBlock::genesis(&genesis);
                let staged = VersionDb::new(db.clone());
                state::put_block_bytes(&staged, &block.id(), block.bytes())?;
                state::set_last_accepted(&staged, &block.id())?;
                staged.commit()?;
                tracing::info!("Initialized genesis block {}", block.id());
                block
            }
        };

        let (stop, _) = watch::channel(false);
        Ok(Self {
            mempool: Mutex::new(Mempool::new(config.mempool_size)),
            gossiper: Gossiper::new(sender, config.gossiped_cache_size),
            chain: RwLock::new(ChainIndex::new(db.clone(), last_accepted)),
            ctx_lock: Mutex::new(()),
            genesis,
            config,
            db,
            clock,
            stop,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Spawn the pruner and regossip loops; a no-op once they are running
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::debug!("VM background loops already running");
            return;
        }
        tasks.push(tokio::spawn(pruner::run_pruner(
            self.clone(),
            self.stop.subscribe(),
        )));
        tasks.push(tokio::spawn(gossip::run_regossip(
            self.clone(),
            self.stop.subscribe(),
        )));
        tracing::info!("VM background loops started");
    }

    /// Receiver that flips to `true` once shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Stop background loops, wait for them to exit, then close the database
    pub async fn shutdown(&self) -> Result<(), VmError> {
        self.stop.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }

        self.db.close()?;
        tracing::info!("VM shut down");
        Ok(())
    }

    // ============ Block lifecycle ============

    pub fn parse_block(&self, bytes: &[u8]) -> Result<StatelessBlock, VmError> {
        Ok(StatelessBlock::parse(bytes)?)
    }

    pub fn get_block(&self, id: &Id) -> Result<StatelessBlock, VmError> {
        self.chain
            .read()
            .get_block(id)?
            .ok_or(VmError::BlockNotFound(*id))
    }

    pub fn last_accepted(&self) -> Id {
        self.chain.read().last_accepted().id()
    }

    pub fn preferred(&self) -> Id {
        self.chain.read().preferred()
    }

    pub fn set_preference(&self, id: Id) -> Result<(), VmError> {
        tracing::debug!("Set preference {}", id);
        self.chain.write().set_preferred(id)
    }

    /// Build a block on the preferred head from the mempool
    ///
    /// The built block is recorded as verified.
    pub fn build_block(&self) -> Result<StatelessBlock, VmError> {
        let _guard = self.ctx_lock.lock();

        let (parent, parent_state) = self.preferred_with_state()?;
        let timestamp = self.clock.now().max(parent.timestamp);
        let ctx = self.execution_context(timestamp, &parent)?;

        let (block, state) = {
            let mut mempool = self.mempool.lock();
            BlockBuilder::new(&self.genesis, &self.config).build(
                &mut mempool,
                &parent,
                parent_state,
                &ctx,
                timestamp,
            )?
        };

        self.chain.write().insert_verified(block.clone(), state);
        Ok(block)
    }

    /// Re-execute a block received from consensus against its parent
    pub fn verify_block(&self, block: &StatelessBlock) -> Result<(), VmError> {
        let _guard = self.ctx_lock.lock();

        let id = block.id();
        if self.chain.read().is_verified(&id) {
            return Ok(());
        }

        let (parent, parent_state) = {
            let chain = self.chain.read();
            let parent = chain
                .get_block(&block.parent)?
                .ok_or(VmError::UnknownParent(block.parent))?;
            let parent_state = chain
                .state_of(&block.parent)
                .ok_or(VmError::UnknownParent(block.parent))?;
            (parent, parent_state)
        };

        let ctx = self.execution_context(block.timestamp, &parent)?;
        let max_timestamp = self.clock.now().saturating_add(self.config.future_bound);
        let state = block::verify(
            &self.genesis,
            block,
            &parent,
            parent_state,
            &ctx,
            max_timestamp,
        )?;

        tracing::debug!("Verified block {} at height {}", id, block.height);
        self.chain.write().insert_verified(block.clone(), state);
        Ok(())
    }

    /// Commit a verified child of the last accepted block
    pub fn accept_block(&self, id: &Id) -> Result<(), VmError> {
        let _guard = self.ctx_lock.lock();

        let verified = {
            let chain = self.chain.read();
            let verified = chain.verified(id).ok_or(VmError::NotVerified(*id))?;
            if verified.block.parent != chain.last_accepted().id() {
                return Err(VmError::UnknownParent(verified.block.parent));
            }
            verified
        };

        state::put_block_bytes(verified.state.as_ref(), id, verified.block.bytes())?;
        state::set_last_accepted(verified.state.as_ref(), id)?;
        verified.state.commit()?;

        {
            let mut chain = self.chain.write();
            chain.take_verified(id);
            chain.set_last_accepted(verified.block.clone());
            chain.set_children_db();
        }

        let tx_ids: Vec<Id> = verified.block.txs.iter().map(|tx| tx.id()).collect();
        self.mempool.lock().remove(&tx_ids);

        tracing::info!(
            "Accepted block {} at height {} ({} txs)",
            id,
            verified.block.height,
            tx_ids.len()
        );
        Ok(())
    }

    /// Drop a verified block and return its transactions to the mempool
    pub fn reject_block(&self, id: &Id) -> Result<(), VmError> {
        let _guard = self.ctx_lock.lock();

        let verified = {
            let mut chain = self.chain.write();
            let verified = chain.take_verified(id).ok_or(VmError::NotVerified(*id))?;
            if chain.preferred() == *id {
                let fallback = chain.last_accepted().id();
                chain.set_preferred(fallback)?;
            }
            verified
        };
        verified.state.abort();

        let mut returned = 0;
        {
            let mut mempool = self.mempool.lock();
            for tx in verified.block.into_inner().txs {
                if !state::has_transaction(self.db.as_ref(), &tx.id())? && mempool.add(tx) {
                    returned += 1;
                }
            }
        }

        tracing::info!("Rejected block {} ({} txs returned to mempool)", id, returned);
        Ok(())
    }

    // ============ Transactions ============

    /// Check transactions against the preferred head and admit the valid ones
    ///
    /// Each result is whether the mempool holds the transaction afterwards.
    pub fn submit(&self, txs: Vec<Transaction>) -> Result<Vec<Result<bool, ChainError>>, VmError> {
        let _guard = self.ctx_lock.lock();

        let (parent, parent_state) = self.preferred_with_state()?;
        let now = self.clock.now().max(parent.timestamp);
        let ctx = self.execution_context(now, &parent)?;
        let staged = VersionDb::new(parent_state);

        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            let result = tx
                .validate(&self.genesis)
                .and_then(|_| tx.execute(&self.genesis, &staged, now, &ctx));
            staged.abort();
            match result {
                Ok(()) => results.push(Ok(self.mempool.lock().add(tx))),
                Err(e) => {
                    tracing::debug!("Failed to submit transaction {}: {}", tx.id(), e);
                    results.push(Err(e));
                }
            }
        }
        Ok(results)
    }

    /// Decode and submit one transaction
    pub fn issue_tx(&self, bytes: &[u8]) -> Result<(Id, bool), VmError> {
        let tx = Transaction::from_bytes(bytes)?;
        let id = tx.id();
        match self.submit(vec![tx])?.pop() {
            Some(Ok(admitted)) => Ok((id, admitted)),
            Some(Err(e)) => Err(e.into()),
            None => Err(VmError::Chain(ChainError::InvalidEmptyTx)),
        }
    }

    /// Handle transactions gossiped by a peer
    ///
    /// Returns how many were admitted.
    pub fn app_gossip(&self, msg: &[u8]) -> Result<usize, VmError> {
        let msg = GossipMessage::from_bytes(msg)
            .map_err(|e| VmError::Chain(ChainError::Codec(e.to_string())))?;
        let received = msg.txs.len();
        let admitted = self
            .submit(msg.txs)?
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        tracing::debug!("AppGossip: {} of {} transactions admitted", admitted, received);
        Ok(admitted)
    }

    // ============ Queries ============

    /// Whether a transaction is confirmed in accepted state
    pub fn has_transaction(&self, id: &Id) -> Result<bool, VmError> {
        Ok(state::has_transaction(self.db.as_ref(), id)?)
    }

    /// Whether `id` may be referenced by a new transaction
    pub fn valid_block_id(&self, id: &Id) -> Result<bool, VmError> {
        let ctx = self.preferred_context()?;
        Ok(ctx.recent_block_ids.contains(id))
    }

    /// Difficulty a submitter should mine to
    pub fn difficulty_estimate(&self) -> Result<u64, VmError> {
        Ok(self.preferred_context()?.difficulty_estimate())
    }

    /// Lease record in accepted state
    pub fn prefix_info(&self, prefix: &str) -> Result<Option<PrefixInfo>, VmError> {
        Ok(state::get_prefix_info(self.db.as_ref(), prefix.as_bytes())?)
    }

    /// Value stored under a prefix in accepted state
    pub fn get_value(&self, prefix: &str, key: &str) -> Result<Option<Vec<u8>>, VmError> {
        Ok(state::get_value(self.db.as_ref(), prefix.as_bytes(), key.as_bytes())?)
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn mempool_has(&self, id: &Id) -> bool {
        self.mempool.lock().has(id)
    }

    // ============ Helpers ============

    fn preferred_with_state(&self) -> Result<(StatelessBlock, Arc<dyn Database>), VmError> {
        let chain = self.chain.read();
        let id = chain.preferred();
        let block = chain.get_block(&id)?.ok_or(VmError::BlockNotFound(id))?;
        let state = chain.state_of(&id).ok_or(VmError::UnknownParent(id))?;
        Ok((block, state))
    }

    fn preferred_context(&self) -> Result<ExecutionContext, VmError> {
        let parent = self.get_block(&self.preferred())?;
        let now = self.clock.now().max(parent.timestamp);
        self.execution_context(now, &parent)
    }

    pub(crate) fn execution_context(
        &self,
        now: u64,
        parent: &StatelessBlock,
    ) -> Result<ExecutionContext, VmError> {
        let chain = self.chain.read();
        Ok(ExecutionContext::build(&self.genesis, now, parent, |id| {
            chain.get_block(id)
        })?)
    }
}
