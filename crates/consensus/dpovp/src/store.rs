//! Block and confirmation storage.
//!
//! The store keeps two kinds of blocks: the stable chain, one block per height, and the
//! unconfirmed fork set, a tree of blocks descending from the stable block.

use crate::errors::StoreError;
use alloy_primitives::B256;
use dpovp_primitives::{Block, SignData};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

/// Block/confirm store consumed by the consensus core
pub trait ChainStore: Send + Sync + std::fmt::Debug {
    /// Block by hash, stable or not
    fn get_block_by_hash(&self, hash: &B256) -> Result<Block, StoreError>;

    /// Stable block at `height`
    fn get_block_by_height(&self, height: u64) -> Result<Block, StoreError>;

    /// Block at `height` on the fork ending at `leaf_hash`
    fn get_unconfirm_by_height(&self, height: u64, leaf_hash: &B256) -> Result<Block, StoreError>;

    /// Visit every unconfirmed block
    fn iterate_unconfirms(&self, f: &mut dyn FnMut(&Block));

    /// Whether a block with this hash is stored
    fn is_exist_by_hash(&self, hash: &B256) -> bool;

    /// Store a new unconfirmed block
    fn set_block(&self, hash: B256, block: Block) -> Result<(), StoreError>;

    /// Append confirmations to a stored block, skipping ones already present
    fn set_confirms(&self, hash: &B256, sigs: &[SignData]) -> Result<(), StoreError>;

    /// Promote `hash` and its unconfirmed ancestors to the stable chain.
    ///
    /// Returns the unconfirmed blocks that do not descend from the new stable block, which are
    /// removed.
    fn set_stable_block(&self, hash: &B256) -> Result<Vec<Block>, StoreError>;

    /// Latest stable block
    fn load_latest_block(&self) -> Result<Block, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    blocks: HashMap<B256, Block>,
    stable_chain: BTreeMap<u64, B256>,
    unconfirmed: HashSet<B256>,
    stable: B256,
}

impl Inner {
    fn stable_height(&self) -> u64 {
        self.blocks.get(&self.stable).map(Block::height).unwrap_or_default()
    }

    /// Whether `hash` is `ancestor` or one of its unconfirmed descendants
    fn descends_from(&self, hash: &B256, ancestor: &B256, ancestor_height: u64) -> bool {
        let mut current = *hash;
        while let Some(block) = self.blocks.get(&current) {
            if current == *ancestor {
                return true
            }
            if block.height() <= ancestor_height {
                return false
            }
            current = block.parent_hash();
        }
        false
    }
}

/// Thread-safe in-memory [`ChainStore`]
#[derive(Debug)]
pub struct MemoryChainStore {
    inner: RwLock<Inner>,
}

impl MemoryChainStore {
    /// Create a store whose stable chain starts at `genesis`
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let mut inner = Inner { stable: hash, ..Default::default() };
        inner.stable_chain.insert(genesis.height(), hash);
        inner.blocks.insert(hash, genesis);
        Self { inner: RwLock::new(inner) }
    }

    /// Number of unconfirmed blocks
    pub fn unconfirmed_count(&self) -> usize {
        self.inner.read().unconfirmed.len()
    }

    /// Hashes of unconfirmed blocks without children
    pub fn fork_heads(&self) -> Vec<B256> {
        let inner = self.inner.read();
        let parents: HashSet<B256> = inner
            .unconfirmed
            .iter()
            .filter_map(|hash| inner.blocks.get(hash).map(Block::parent_hash))
            .collect();
        let mut heads: Vec<B256> =
            inner.unconfirmed.iter().filter(|hash| !parents.contains(*hash)).copied().collect();
        if heads.is_empty() {
            heads.push(inner.stable);
        }
        heads.sort_unstable();
        heads
    }
}

impl ChainStore for MemoryChainStore {
    fn get_block_by_hash(&self, hash: &B256) -> Result<Block, StoreError> {
        self.inner.read().blocks.get(hash).cloned().ok_or(StoreError::NotFound(*hash))
    }

    fn get_block_by_height(&self, height: u64) -> Result<Block, StoreError> {
        let inner = self.inner.read();
        inner
            .stable_chain
            .get(&height)
            .and_then(|hash| inner.blocks.get(hash))
            .cloned()
            .ok_or(StoreError::HeightNotFound(height))
    }

    fn get_unconfirm_by_height(&self, height: u64, leaf_hash: &B256) -> Result<Block, StoreError> {
        let inner = self.inner.read();
        let mut current = *leaf_hash;
        while inner.unconfirmed.contains(&current) {
            let block = inner.blocks.get(&current).ok_or(StoreError::NotFound(current))?;
            if block.height() == height {
                return Ok(block.clone())
            }
            if block.height() < height {
                break
            }
            current = block.parent_hash();
        }
        Err(StoreError::HeightNotFound(height))
    }

    fn iterate_unconfirms(&self, f: &mut dyn FnMut(&Block)) {
        let inner = self.inner.read();
        for hash in &inner.unconfirmed {
            if let Some(block) = inner.blocks.get(hash) {
                f(block);
            }
        }
    }

    fn is_exist_by_hash(&self, hash: &B256) -> bool {
        self.inner.read().blocks.contains_key(hash)
    }

    fn set_block(&self, hash: B256, block: Block) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&hash) {
            return Err(StoreError::AlreadyExists(hash))
        }
        let stable = inner.stable_height();
        if block.height() <= stable {
            return Err(StoreError::BelowStable { hash, height: block.height(), stable })
        }
        trace!(target: "dpovp::store", %hash, height = block.height(), "Stored block");
        inner.blocks.insert(hash, block);
        inner.unconfirmed.insert(hash);
        Ok(())
    }

    fn set_confirms(&self, hash: &B256, sigs: &[SignData]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let block = inner.blocks.get_mut(hash).ok_or(StoreError::NotFound(*hash))?;
        for sig in sigs {
            block.add_confirm(*sig);
        }
        Ok(())
    }

    fn set_stable_block(&self, hash: &B256) -> Result<Vec<Block>, StoreError> {
        let mut inner = self.inner.write();
        if inner.stable == *hash {
            return Ok(Vec::new())
        }
        if !inner.unconfirmed.contains(hash) {
            return Err(StoreError::NotFound(*hash))
        }

        let new_height = inner.blocks.get(hash).map(Block::height).unwrap_or_default();
        let stable = inner.stable_height();
        if new_height <= stable {
            return Err(StoreError::BelowStable { hash: *hash, height: new_height, stable })
        }

        // promote the new stable block and its unconfirmed ancestors
        let mut current = *hash;
        while inner.unconfirmed.remove(&current) {
            let Some(block) = inner.blocks.get(&current) else { break };
            let (height, parent) = (block.height(), block.parent_hash());
            inner.stable_chain.insert(height, current);
            current = parent;
        }
        inner.stable = *hash;

        // prune everything not descending from it
        let doomed: Vec<B256> = inner
            .unconfirmed
            .iter()
            .filter(|candidate| !inner.descends_from(candidate, hash, new_height))
            .copied()
            .collect();
        let mut pruned = Vec::with_capacity(doomed.len());
        for doomed_hash in doomed {
            inner.unconfirmed.remove(&doomed_hash);
            if let Some(block) = inner.blocks.remove(&doomed_hash) {
                pruned.push(block);
            }
        }
        pruned.sort_by_key(Block::height);

        debug!(target: "dpovp::store", %hash, height = new_height, pruned = pruned.len(), "Stable block updated");
        Ok(pruned)
    }

    fn load_latest_block(&self) -> Result<Block, StoreError> {
        let inner = self.inner.read();
        inner.blocks.get(&inner.stable).cloned().ok_or(StoreError::NotFound(inner.stable))
    }
}
