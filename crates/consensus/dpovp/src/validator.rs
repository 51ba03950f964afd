//! Block and confirmation validation.

use crate::{
    constants::PARENT_TIME_TOLERANCE_SECS,
    errors::{DpovpError, DpovpResult, StoreError},
    external::CandidateLoader,
    schedule::{get_miner_distance, is_in_mine_slot},
    store::ChainStore,
    term::TermRegistry,
};
use alloy_primitives::{Address, B256};
use dpovp_primitives::{change_log_root, deputy_root, tx_root, Block, NodeId, SignData};
use rayon::prelude::*;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// Stateless checks of received blocks and confirmations
#[derive(Debug)]
pub struct Validator {
    registry: Arc<TermRegistry>,
    store: Arc<dyn ChainStore>,
    candidates: Arc<dyn CandidateLoader>,
}

impl Validator {
    /// Create a validator
    pub fn new(
        registry: Arc<TermRegistry>,
        store: Arc<dyn ChainStore>,
        candidates: Arc<dyn CandidateLoader>,
    ) -> Self {
        Self { registry, store, candidates }
    }

    /// Checks that need no transaction execution. Returns the parent block.
    pub fn verify_before_tx_process(&self, block: &Block, now: u64) -> DpovpResult<Block> {
        let config = self.registry.config();
        let header = &block.header;
        let hash = block.hash();

        let parent = self.store.get_block_by_hash(&header.parent_hash).map_err(|err| match err {
            StoreError::NotFound(parent) => DpovpError::UnknownParent(parent),
            err => err.into(),
        })?;

        self.verify_signer(block, &hash)?;

        if tx_root(&block.txs) != header.tx_root {
            return Err(DpovpError::TxRootMismatch)
        }

        if header.height != parent.height() + 1 {
            return Err(DpovpError::HeightMismatch { expected: parent.height() + 1, got: header.height })
        }

        if header.time > now + config.future_block_tolerance_secs {
            return Err(DpovpError::FutureBlock { time: header.time, now })
        }

        self.verify_deputies(block)?;

        if header.extra.len() > config.max_extra_len {
            return Err(DpovpError::ExtraTooLong { len: header.extra.len(), max: config.max_extra_len })
        }

        self.verify_mine_slot(block, &parent)?;

        Ok(parent)
    }

    /// Compare a received block with the block recomputed by executing its transactions.
    ///
    /// The hash covers the state, log and gas fields the executor produced.
    pub fn verify_after_tx_process(&self, block: &Block, computed: &Block) -> DpovpResult<()> {
        let (expected, computed_hash) = (block.hash(), computed.hash());
        if expected != computed_hash {
            debug!(
                target: "dpovp::validator",
                received = ?block.header,
                computed = ?computed.header,
                "Recomputed block differs"
            );
            return Err(DpovpError::HashMismatch { expected, computed: computed_hash })
        }
        if change_log_root(&computed.change_logs) != block.header.change_log_root {
            return Err(DpovpError::ChangeLogRootMismatch)
        }
        Ok(())
    }

    /// Filter `sigs` down to new confirmations of `block` by deputies.
    ///
    /// Returns the accepted signatures and the last rejection, if any.
    pub fn verify_new_confirms(
        &self,
        block: &Block,
        sigs: &[SignData],
    ) -> (Vec<SignData>, Option<DpovpError>) {
        let hash = block.hash();
        let height = block.height();

        let mut seen: HashSet<NodeId> = block
            .confirms
            .par_iter()
            .filter_map(|sig| sig.recover_node(&hash).ok())
            .collect();

        let recovered: Vec<_> = sigs.par_iter().map(|sig| (*sig, sig.recover_node(&hash))).collect();

        let mut accepted = Vec::new();
        let mut last_err = None;
        for (sig, node_id) in recovered {
            let node_id = match node_id {
                Ok(node_id) => node_id,
                Err(err) => {
                    last_err = Some(DpovpError::InvalidConfirmSig(err));
                    continue
                }
            };
            let Some(deputy) = self.registry.get_deputy_by_node_id(height, &node_id) else {
                last_err = Some(DpovpError::ConfirmNotDeputy(node_id));
                continue
            };
            if deputy.miner_address == block.miner_address() {
                last_err = Some(DpovpError::ConfirmFromMiner);
                continue
            }
            if !seen.insert(node_id) {
                last_err = Some(DpovpError::DuplicateConfirm(node_id));
                continue
            }
            accepted.push(sig);
        }

        if let Some(err) = &last_err {
            debug!(target: "dpovp::validator", %hash, height, accepted = accepted.len(), %err, "Rejected confirms");
        }
        (accepted, last_err)
    }

    /// Look for another unstable block by the same miner at the same height.
    ///
    /// Marks the miner evil and returns it if one exists.
    pub fn judge_deputy(&self, block: &Block) -> Option<Address> {
        let hash = block.hash();
        let (height, miner) = (block.height(), block.miner_address());

        let mut conflict = None;
        self.store.iterate_unconfirms(&mut |other| {
            if conflict.is_none() &&
                other.height() == height &&
                other.miner_address() == miner &&
                other.hash() != hash
            {
                conflict = Some(other.hash());
            }
        });

        let other = conflict?;
        warn!(target: "dpovp::validator", %miner, height, %hash, %other, "Miner produced two blocks at one height");
        self.registry.set_evil(miner, height + self.registry.config().evil_release_interval);
        Some(miner)
    }

    /// Header signature recovers to a deputy at the block height who is the declared miner.
    fn verify_signer(&self, block: &Block, hash: &B256) -> DpovpResult<()> {
        let sig = block.header.sign_data.ok_or(DpovpError::MissingSignData)?;
        let node_id = sig.recover_node(hash).map_err(|_| DpovpError::InvalidSigner)?;
        let deputy = self
            .registry
            .get_deputy_by_node_id(block.height(), &node_id)
            .ok_or(DpovpError::InvalidSigner)?;
        if deputy.miner_address != block.miner_address() {
            return Err(DpovpError::MinerMismatch {
                signer: deputy.miner_address,
                miner: block.miner_address(),
            })
        }
        Ok(())
    }

    /// Snapshot blocks embed the locally elected top candidates, other blocks embed nothing.
    fn verify_deputies(&self, block: &Block) -> DpovpResult<()> {
        let header = &block.header;
        if !self.registry.config().is_snapshot_height(header.height) {
            if !block.deputy_nodes.is_empty() || !header.deputy_root.is_zero() {
                return Err(DpovpError::DeputyRootMismatch)
            }
            return Ok(())
        }

        let max = self.registry.config().max_deputy_count;
        if block.deputy_nodes.len() > max as usize {
            return Err(DpovpError::TooManyDeputies { count: block.deputy_nodes.len(), max })
        }
        let ranked = block.deputy_nodes.iter().enumerate().all(|(i, node)| node.rank as usize == i);
        if block.deputy_nodes.is_empty() || !ranked {
            return Err(DpovpError::DeputyRootMismatch)
        }
        let root = deputy_root(&block.deputy_nodes);
        if root != header.deputy_root {
            return Err(DpovpError::DeputyRootMismatch)
        }
        let mut top = self.candidates.load_top_candidates(&header.parent_hash);
        top.truncate(max as usize);
        let local = deputy_root(&top);
        if local != root {
            warn!(target: "dpovp::validator", height = header.height, %root, %local, "Snapshot deputies differ from local election");
            return Err(DpovpError::DeputyRootMismatch)
        }
        Ok(())
    }

    /// The block was produced in its miner's slot after the parent. Its timestamp may trail
    /// the parent's by one second.
    fn verify_mine_slot(&self, block: &Block, parent: &Block) -> DpovpResult<()> {
        let (time, parent_time) = (block.time(), parent.time());
        if time + PARENT_TIME_TOLERANCE_SECS < parent_time {
            return Err(DpovpError::TimestampBeforeParent { time, parent: parent_time })
        }

        let height = block.height();
        let miner = block.miner_address();
        let distance = get_miner_distance(&self.registry, height, &parent.miner_address(), &miner)
            .map_err(|_| DpovpError::MineSlotMismatch { miner })?;
        let count = self.registry.get_deputies_count(height)? as u64;
        let timeout = self.registry.config().mine_timeout_ms;

        let span = time.saturating_sub(parent_time);
        if !is_in_mine_slot(span * 1000, distance, count, timeout) {
            debug!(target: "dpovp::validator", height, %miner, distance, span, "Block outside mine slot");
            return Err(DpovpError::MineSlotMismatch { miner })
        }
        Ok(())
    }
}
