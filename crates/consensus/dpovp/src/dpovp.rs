//! DPoVP Consensus Engine
//!
//! Composes the term registry, validator, confirmer, fork and stable managers and the block
//! assembler into the operations a node host drives:
//! - mine a block on the current head
//! - insert a block received from the network
//! - insert single or batched confirmations
//! - re-confirm stable blocks that never reached quorum

use crate::{
    assembler::BlockAssembler,
    config::DpovpConfig,
    confirmer::{BlockConfirmData, BlockConfirms, Confirmer},
    errors::{DpovpError, DpovpResult, InsertOutcome, StoreError},
    events::{ConsensusEvent, EventSink, EventWorker, OutboundHandle},
    external::{AccountState, CandidateLoader, TxExecutor},
    fork::ForkManager,
    schedule::{get_miner_distance, get_next_mine_window},
    signer::NodeSigner,
    stable::StableManager,
    store::ChainStore,
    term::TermRegistry,
    validator::Validator,
};
use alloy_primitives::{Bytes, B256};
use chrono::Utc;
use dpovp_primitives::{Block, DeputyNodes, SignData, Transaction};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, trace, warn};

/// External collaborators of the engine
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Block and confirmation storage
    pub store: Arc<dyn ChainStore>,
    /// Transaction executor
    pub executor: Arc<dyn TxExecutor>,
    /// Account layer
    pub accounts: Arc<dyn AccountState>,
    /// Candidate election
    pub candidates: Arc<dyn CandidateLoader>,
}

/// Result of mining a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedBlock {
    /// The new head block
    pub block: Block,
    /// Pool transactions rejected during selection
    pub rejected: Vec<Transaction>,
}

/// DPoVP Consensus Engine
#[derive(Debug)]
pub struct Dpovp {
    config: DpovpConfig,
    store: Arc<dyn ChainStore>,
    registry: Arc<TermRegistry>,
    signer: Arc<NodeSigner>,
    validator: Arc<Validator>,
    confirmer: Confirmer,
    fork: ForkManager,
    stable: StableManager,
    assembler: BlockAssembler,
    outbound: OutboundHandle,
    worker: Mutex<Option<EventWorker>>,
    /// Serializes chain mutations
    chain_lock: Mutex<()>,
}

impl Dpovp {
    /// Create the engine.
    ///
    /// Terms are rebuilt from the snapshot blocks of the stored stable chain, and the head is
    /// the best stored fork, or the stable block if there is none.
    pub fn new(
        config: DpovpConfig,
        signer: NodeSigner,
        collaborators: Collaborators,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> DpovpResult<Self> {
        config.validate()?;
        let Collaborators { store, executor, accounts, candidates } = collaborators;

        let registry = Arc::new(TermRegistry::new(config.clone()));
        let stable_block = store.load_latest_block()?;
        let mut snapshot = 0;
        while snapshot <= stable_block.height() {
            let block = store.get_block_by_height(snapshot)?;
            if block.deputy_nodes.len() > config.max_deputy_count as usize {
                return Err(DpovpError::InvalidConfig(format!(
                    "snapshot {snapshot} has {} deputies, more than max_deputy_count {}",
                    block.deputy_nodes.len(),
                    config.max_deputy_count
                )))
            }
            registry.save_snapshot(snapshot, block.deputy_nodes);
            snapshot += config.term_duration;
        }

        let signer = Arc::new(signer);
        let validator = Arc::new(Validator::new(registry.clone(), store.clone(), candidates.clone()));
        let worker = EventWorker::spawn(sinks, validator.clone());
        let outbound = worker.handle();

        let fork = ForkManager::new(stable_block.clone(), registry.clone(), store.clone());
        if let Some(best) = fork.choose_new_fork() {
            fork.set_head(Arc::new(best));
        }

        info!(
            target: "dpovp",
            node_id = %signer.node_id(),
            stable = stable_block.height(),
            head = fork.head_block().height(),
            terms = registry.term_count(),
            "Initialized DPoVP consensus engine"
        );

        Ok(Self {
            confirmer: Confirmer::new(signer.clone(), registry.clone(), store.clone(), &stable_block),
            stable: StableManager::new(registry.clone(), store.clone()),
            assembler: BlockAssembler::new(
                registry.clone(),
                signer.clone(),
                executor,
                accounts,
                candidates,
                outbound.clone(),
            ),
            config,
            store,
            registry,
            signer,
            validator,
            fork,
            outbound,
            worker: Mutex::new(Some(worker)),
            chain_lock: Mutex::new(()),
        })
    }

    /// Get the DPoVP configuration
    pub const fn config(&self) -> &DpovpConfig {
        &self.config
    }

    /// Current head block
    pub fn head_block(&self) -> Arc<Block> {
        self.fork.head_block()
    }

    /// Latest stable block
    pub fn stable_block(&self) -> DpovpResult<Block> {
        self.stable.stable_block()
    }

    /// Deputy terms
    pub fn term_registry(&self) -> &Arc<TermRegistry> {
        &self.registry
    }

    /// Validator used for received blocks
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// Confirmer of this node
    pub const fn confirmer(&self) -> &Confirmer {
        &self.confirmer
    }

    /// Next `[from, to)` window, in unix milliseconds, in which this node may mine on the head.
    pub fn mine_window(&self, now_ms: u64) -> DpovpResult<(u64, u64)> {
        let head = self.fork.head_block();
        let height = head.height() + 1;
        let miner = self
            .registry
            .get_deputy_by_node_id(height, &self.signer.node_id())
            .ok_or(DpovpError::NotDeputy(height))?
            .miner_address;
        let distance = get_miner_distance(&self.registry, height, &head.miner_address(), &miner)?;
        get_next_mine_window(
            &self.registry,
            height,
            distance,
            head.time() * 1000,
            now_ms,
            self.config.mine_timeout_ms,
        )
    }

    /// Mine a block on the current head.
    pub fn mine_block(
        &self,
        txs: Vec<Transaction>,
        extra: Bytes,
        budget: Duration,
    ) -> DpovpResult<MinedBlock> {
        let _guard = self.chain_lock.lock();

        let parent = self.fork.head_block();
        let now = Utc::now().timestamp().max(0) as u64;
        let header = self.assembler.prepare_header(&parent.header, extra, now)?;
        let (block, rejected) = self.assembler.mine_block(&header, txs, budget)?;
        let hash = block.hash();

        self.assembler.commit(&block)?;
        self.store.set_block(hash, block.clone())?;
        self.save_term_snapshot(block.height(), &block.deputy_nodes);
        self.fork.set_head(Arc::new(block.clone()));
        info!(
            target: "dpovp",
            height = block.height(),
            %hash,
            txs = block.txs.len(),
            rejected = rejected.len(),
            "Mined block"
        );
        self.outbound.publish(ConsensusEvent::MinedBlock(block.clone()));
        self.outbound.publish(ConsensusEvent::HeadBlockChanged(block.clone()));

        // a single deputy is its own quorum
        if let Some(pruned) = self.update_stable(&block)? {
            self.reselect_head_after_stable(&pruned)?;
        }

        Ok(MinedBlock { block, rejected })
    }

    /// Verify and insert a block received from the network.
    pub fn insert_block(&self, block: Block) -> DpovpResult<InsertOutcome> {
        let _guard = self.chain_lock.lock();

        let hash = block.hash();
        if self.store.is_exist_by_hash(&hash) {
            trace!(target: "dpovp", %hash, height = block.height(), "Block already known");
            return Ok(InsertOutcome::Ignored)
        }
        let stable = self.stable.stable_block()?;
        if block.height() <= stable.height() {
            debug!(target: "dpovp", %hash, height = block.height(), stable = stable.height(), "Ignoring stale block");
            return Ok(InsertOutcome::Ignored)
        }

        let now = Utc::now().timestamp().max(0) as u64;
        let mut sealed = self.verify_and_seal(&block, now).inspect_err(|err| {
            if err.is_invalid_block() {
                warn!(target: "dpovp", %hash, height = block.height(), %err, "Rejected invalid block");
            } else {
                warn!(target: "dpovp", %hash, height = block.height(), %err, "Failed to process block");
            }
        })?;

        if let Some(sign_data) = self.confirmer.try_confirm(&mut sealed) {
            let age = now.saturating_sub(sealed.time());
            if age < self.config.confirm_broadcast_max_age_secs {
                self.outbound.publish(ConsensusEvent::NewConfirm(BlockConfirmData {
                    hash,
                    height: sealed.height(),
                    sign_data,
                }));
            } else {
                trace!(target: "dpovp", %hash, age, "Not broadcasting confirm of old block");
            }
        }

        self.assembler.commit(&sealed)?;
        self.store.set_block(hash, sealed.clone())?;
        self.save_term_snapshot(sealed.height(), &sealed.deputy_nodes);
        info!(
            target: "dpovp",
            height = sealed.height(),
            %hash,
            miner = %sealed.miner_address(),
            confirms = sealed.confirms.len(),
            "Inserted block"
        );

        let head = self.fork.head_block();
        let extends_head = sealed.parent_hash() == head.hash();
        if extends_head {
            self.fork.set_head(Arc::new(sealed.clone()));
            self.outbound.publish(ConsensusEvent::HeadBlockChanged(sealed.clone()));
        }
        self.outbound.judge_deputy(sealed.clone());

        match self.update_stable(&sealed)? {
            Some(pruned) => self.reselect_head_after_stable(&pruned)?,
            None if !extends_head => self.try_switch_fork()?,
            None => {}
        }

        Ok(InsertOutcome::Accepted)
    }

    /// Insert a single confirmation received from the network.
    pub fn insert_confirm(&self, confirm: BlockConfirmData) -> DpovpResult<()> {
        self.insert_confirms(confirm.hash, &[confirm.sign_data])
    }

    /// Insert a batch of confirmations of one block, usually a block that is already stable.
    pub fn insert_stable_confirms(&self, pack: BlockConfirms) -> DpovpResult<()> {
        self.insert_confirms(pack.hash, &pack.confirms)
    }

    /// Confirm stable blocks in `start..=end` that lack quorum and publish the confirmations.
    pub fn confirm_stable_backlog(&self, start: u64, end: u64) -> DpovpResult<Vec<BlockConfirmData>> {
        let confirms = self.confirmer.batch_confirm_stable(start, end)?;
        if !confirms.is_empty() {
            self.outbound.publish(ConsensusEvent::StableConfirms(confirms.clone()));
        }
        Ok(confirms)
    }

    /// Stop the event worker after it drained every queued task.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown();
        }
    }

    fn insert_confirms(&self, hash: B256, sigs: &[SignData]) -> DpovpResult<()> {
        let _guard = self.chain_lock.lock();

        let block = self.store.get_block_by_hash(&hash).map_err(|err| match err {
            StoreError::NotFound(hash) => DpovpError::BlockNotFound(hash),
            err => err.into(),
        })?;

        let (accepted, last_err) = self.validator.verify_new_confirms(&block, sigs);
        if accepted.is_empty() {
            return Err(last_err.unwrap_or(DpovpError::NoNewConfirms))
        }
        self.store.set_confirms(&hash, &accepted)?;
        debug!(target: "dpovp", %hash, height = block.height(), added = accepted.len(), "Inserted confirms");

        let block = self.store.get_block_by_hash(&hash)?;
        if let Some(pruned) = self.update_stable(&block)? {
            self.reselect_head_after_stable(&pruned)?;
        }
        Ok(())
    }

    /// Verify a received block, re-execute it and keep only its valid confirmations.
    fn verify_and_seal(&self, block: &Block, now: u64) -> DpovpResult<Block> {
        self.validator.verify_before_tx_process(block, now)?;
        let mut sealed = self.assembler.run_block(block)?;
        self.validator.verify_after_tx_process(block, &sealed)?;

        sealed.header.sign_data = block.header.sign_data;
        let (confirms, last_err) = self.validator.verify_new_confirms(&sealed, &block.confirms);
        if let Some(err) = last_err {
            debug!(target: "dpovp", hash = %sealed.hash(), %err, "Dropped invalid confirms of received block");
        }
        sealed.confirms = confirms;
        Ok(sealed)
    }

    /// Promote `block` if it reached quorum, recording terms of newly stable snapshot blocks.
    fn update_stable(&self, block: &Block) -> DpovpResult<Option<Vec<Block>>> {
        let old_height = self.stable.stable_block()?.height();
        let Some(pruned) = self.stable.update_stable(block)? else { return Ok(None) };

        let term = self.config.term_duration;
        let mut snapshot = (old_height / term + 1) * term;
        while snapshot <= block.height() {
            let stable_snapshot = self.store.get_block_by_height(snapshot)?;
            self.save_term_snapshot(snapshot, &stable_snapshot.deputy_nodes);
            snapshot += term;
        }

        self.outbound.publish(ConsensusEvent::StableBlockChanged {
            block: block.clone(),
            pruned: pruned.clone(),
        });
        Ok(Some(pruned))
    }

    /// After the stable block moved, replace the head if it was pruned or fell behind.
    fn reselect_head_after_stable(&self, pruned: &[Block]) -> DpovpResult<()> {
        let head = self.fork.head_block();
        let head_hash = head.hash();
        let stable = self.stable.stable_block()?;

        let head_pruned = pruned.iter().any(|block| block.hash() == head_hash);
        if !head_pruned && head.height() >= stable.height() {
            return Ok(())
        }

        let new_head = self.fork.choose_new_fork().unwrap_or(stable);
        info!(
            target: "dpovp",
            old = %head_hash,
            new = %new_head.hash(),
            height = new_head.height(),
            "Head pruned, choosing new fork"
        );
        self.fork.set_head(Arc::new(new_head.clone()));
        self.outbound.publish(ConsensusEvent::HeadBlockChanged(new_head));
        Ok(())
    }

    fn try_switch_fork(&self) -> DpovpResult<()> {
        let stable = self.stable.stable_block()?;
        if let Some(head) = self.fork.try_switch_fork(&stable)? {
            self.outbound.publish(ConsensusEvent::HeadBlockChanged((*head).clone()));
        }
        Ok(())
    }

    /// Record the deputies embedded at `height` unless the registry already holds them.
    fn save_term_snapshot(&self, height: u64, nodes: &DeputyNodes) {
        if !self.config.is_snapshot_height(height) {
            return
        }
        let index = height / self.config.term_duration;
        if self.registry.get_term_by_index(index).is_some_and(|term| term.nodes == *nodes) {
            trace!(target: "dpovp", term = index, height, "Term snapshot unchanged");
            return
        }
        self.registry.save_snapshot(height, nodes.clone());
    }
}

impl Drop for Dpovp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
