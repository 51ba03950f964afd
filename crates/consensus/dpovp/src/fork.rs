//! Fork choice.

use crate::{errors::DpovpResult, store::ChainStore, term::TermRegistry};
use dpovp_primitives::Block;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks the head block and chooses between unstable forks
#[derive(Debug)]
pub struct ForkManager {
    head: RwLock<Arc<Block>>,
    registry: Arc<TermRegistry>,
    store: Arc<dyn ChainStore>,
}

impl ForkManager {
    /// Create a fork manager with an initial head
    pub fn new(head: Block, registry: Arc<TermRegistry>, store: Arc<dyn ChainStore>) -> Self {
        Self { head: RwLock::new(Arc::new(head)), registry, store }
    }

    /// Current head block
    pub fn head_block(&self) -> Arc<Block> {
        self.head.read().clone()
    }

    /// Replace the head block
    pub fn set_head(&self, block: Arc<Block>) {
        debug!(target: "dpovp::fork", height = block.height(), hash = %block.hash(), "Head changed");
        *self.head.write() = block;
    }

    /// Highest unstable block, ties broken by the smallest hash.
    ///
    /// `None` if every stored block is stable.
    pub fn choose_new_fork(&self) -> Option<Block> {
        let mut best: Option<Block> = None;
        self.store.iterate_unconfirms(&mut |block| {
            let better = match &best {
                None => true,
                Some(current) => {
                    block.height() > current.height() ||
                        (block.height() == current.height() && block.hash() < current.hash())
                }
            };
            if better {
                best = Some(block.clone());
            }
        });
        best
    }

    /// Switch to the best fork if it is higher than the head and its distance to `stable` is a
    /// multiple of the quorum size.
    ///
    /// Switching only at those distances keeps the confirmer's catch-up rule able to confirm
    /// on the new fork. Returns the new head if it changed.
    pub fn try_switch_fork(&self, stable: &Block) -> DpovpResult<Option<Arc<Block>>> {
        let Some(candidate) = self.choose_new_fork() else { return Ok(None) };
        let head = self.head_block();
        if candidate.height() <= head.height() {
            return Ok(None)
        }

        let quorum = self.registry.two_third_deputy_count(candidate.height())? as u64;
        if (candidate.height() - stable.height()) % quorum != 0 {
            return Ok(None)
        }

        info!(
            target: "dpovp::fork",
            from = %head.hash(),
            to = %candidate.hash(),
            height = candidate.height(),
            "Switching fork"
        );
        let candidate = Arc::new(candidate);
        self.set_head(candidate.clone());
        Ok(Some(candidate))
    }
}
