//! Confirmation signing.

use crate::{
    errors::DpovpResult, signer::NodeSigner, stable::is_confirm_enough, store::ChainStore,
    term::TermRegistry,
};
use alloy_primitives::B256;
use dpovp_primitives::{Block, SignData};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// One confirmation of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfirmData {
    /// Confirmed block
    pub hash: B256,
    /// Its height
    pub height: u64,
    /// Deputy signature over `hash`
    pub sign_data: SignData,
}

/// A batch of confirmations of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfirms {
    /// Confirmed block
    pub hash: B256,
    /// Its height
    pub height: u64,
    /// Deputy signatures over `hash`
    pub confirms: Vec<SignData>,
}

/// Last block this node confirmed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignedRecord {
    /// Height of the block
    pub height: u64,
    /// Hash of the block
    pub hash: B256,
}

/// Decides which blocks this node confirms and signs them
#[derive(Debug)]
pub struct Confirmer {
    signer: Arc<NodeSigner>,
    registry: Arc<TermRegistry>,
    store: Arc<dyn ChainStore>,
    last_sig: Mutex<SignedRecord>,
}

impl Confirmer {
    /// Create a confirmer. `stable` becomes the initial last-signed record.
    pub fn new(
        signer: Arc<NodeSigner>,
        registry: Arc<TermRegistry>,
        store: Arc<dyn ChainStore>,
        stable: &Block,
    ) -> Self {
        let last_sig = SignedRecord { height: stable.height(), hash: stable.hash() };
        Self { signer, registry, store, last_sig: Mutex::new(last_sig) }
    }

    /// Last block this node confirmed
    pub fn last_signed(&self) -> SignedRecord {
        *self.last_sig.lock()
    }

    /// Overwrite the last-signed record
    pub fn set_last_signed(&self, block: &Block) {
        *self.last_sig.lock() = SignedRecord { height: block.height(), hash: block.hash() };
    }

    /// Whether this node should confirm `block`.
    ///
    /// Confirms blocks extending the last confirmed one, or far enough above it that a fork
    /// switch happened in between.
    pub fn need_confirm(&self, block: &Block) -> bool {
        let height = block.height();
        let Some(deputy) = self.registry.get_deputy_by_node_id(height, &self.signer.node_id())
        else {
            return false
        };
        if is_confirm_enough(&self.registry, block) {
            return false
        }
        if deputy.miner_address == block.miner_address() {
            return false
        }
        if self.is_signed_by_self(block) {
            return false
        }

        let last = self.last_signed();
        if block.parent_hash() == last.hash {
            return true
        }
        let Ok(quorum) = self.registry.two_third_deputy_count(height) else { return false };
        height > last.height && height - last.height >= quorum as u64
    }

    /// Confirm `block` if needed, appending the signature to it.
    pub fn try_confirm(&self, block: &mut Block) -> Option<SignData> {
        if !self.need_confirm(block) {
            return None
        }
        let hash = block.hash();
        let sig = self.signer.sign(&hash);
        block.add_confirm(sig);
        self.set_last_signed(block);
        debug!(target: "dpovp::confirmer", height = block.height(), %hash, "Confirmed block");
        Some(sig)
    }

    /// Sign stable blocks in `start..=end` that became stable without reaching quorum.
    ///
    /// Signatures are persisted directly and returned for broadcast.
    pub fn batch_confirm_stable(&self, start: u64, end: u64) -> DpovpResult<Vec<BlockConfirmData>> {
        let node_id = self.signer.node_id();
        let mut produced = Vec::new();

        for height in start..=end {
            let Some(deputy) = self.registry.get_deputy_by_node_id(height, &node_id) else {
                continue
            };
            let block = match self.store.get_block_by_height(height) {
                Ok(block) => block,
                Err(err) => {
                    trace!(target: "dpovp::confirmer", height, %err, "No stable block");
                    continue
                }
            };
            if is_confirm_enough(&self.registry, &block) ||
                deputy.miner_address == block.miner_address() ||
                self.is_signed_by_self(&block)
            {
                continue
            }

            let hash = block.hash();
            let sign_data = self.signer.sign(&hash);
            self.store.set_confirms(&hash, &[sign_data])?;
            produced.push(BlockConfirmData { hash, height, sign_data });
        }

        if !produced.is_empty() {
            debug!(target: "dpovp::confirmer", start, end, count = produced.len(), "Confirmed stable blocks");
        }
        Ok(produced)
    }

    fn is_signed_by_self(&self, block: &Block) -> bool {
        let hash = block.hash();
        let node_id = self.signer.node_id();
        block.confirms.iter().any(|sig| sig.recover_node(&hash).is_ok_and(|id| id == node_id))
    }
}
