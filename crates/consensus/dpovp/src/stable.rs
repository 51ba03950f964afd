//! Finality.

use crate::{errors::DpovpResult, store::ChainStore, term::TermRegistry, two_third_count};
use dpovp_primitives::Block;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether `block` has enough signers to become stable.
///
/// The miner's seal counts as one implicit vote. Blocks whose term is unknown are never
/// stable.
pub fn is_confirm_enough(registry: &TermRegistry, block: &Block) -> bool {
    let signers = block.confirms.len() as u32 + 1;
    if signers >= two_third_count(registry.config().max_deputy_count) {
        return true
    }
    match registry.two_third_deputy_count(block.height()) {
        Ok(need) => signers >= need,
        Err(err) => {
            debug!(target: "dpovp::stable", height = block.height(), %err, "Cannot count quorum");
            false
        }
    }
}

/// Promotes blocks with quorum to stable
#[derive(Debug)]
pub struct StableManager {
    registry: Arc<TermRegistry>,
    store: Arc<dyn ChainStore>,
}

impl StableManager {
    /// Create a stable manager
    pub fn new(registry: Arc<TermRegistry>, store: Arc<dyn ChainStore>) -> Self {
        Self { registry, store }
    }

    /// Latest stable block
    pub fn stable_block(&self) -> DpovpResult<Block> {
        Ok(self.store.load_latest_block()?)
    }

    /// Make `block` stable if it has quorum and is above the current stable block.
    ///
    /// Returns the pruned side-fork blocks when the stable block changed.
    pub fn update_stable(&self, block: &Block) -> DpovpResult<Option<Vec<Block>>> {
        let stable = self.stable_block()?;
        if block.height() <= stable.height() {
            return Ok(None)
        }
        if !is_confirm_enough(&self.registry, block) {
            return Ok(None)
        }

        let hash = block.hash();
        let pruned = self.store.set_stable_block(&hash)?;
        info!(
            target: "dpovp::stable",
            height = block.height(),
            %hash,
            confirms = block.confirms.len(),
            pruned = pruned.len(),
            "Stable block changed"
        );
        Ok(Some(pruned))
    }
}
