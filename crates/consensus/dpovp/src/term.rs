//! Deputy terms.
//!
//! Every snapshot block (`height % term_duration == 0`) embeds the deputies of the next term.
//! The registry keeps one [`TermRecord`] per snapshot, indexed `height / term_duration`, and
//! answers which deputies are in charge of a height.

use crate::{
    config::DpovpConfig,
    errors::{DpovpError, DpovpResult},
    two_third_count,
};
use alloy_primitives::Address;
use dpovp_primitives::{DeputyNode, DeputyNodes, NodeId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Deputies of one term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    /// Sequential term index, starting at 0
    pub term_index: u64,
    /// Deputies ordered by rank
    pub nodes: DeputyNodes,
}

impl TermRecord {
    /// Number of deputies in the term
    pub fn deputy_count(&self) -> u32 {
        self.nodes.len() as u32
    }
}

/// Registry of deputy terms
#[derive(Debug)]
pub struct TermRegistry {
    config: DpovpConfig,
    terms: RwLock<Vec<TermRecord>>,
    /// Evil miners and the height their mark expires at
    evil: Mutex<HashMap<Address, u64>>,
}

impl TermRegistry {
    /// Create an empty registry
    pub fn new(config: DpovpConfig) -> Self {
        Self { config, terms: RwLock::new(Vec::new()), evil: Mutex::new(HashMap::new()) }
    }

    /// Record the deputies embedded at snapshot `height`.
    ///
    /// Re-saving an existing term overwrites it and drops every later term.
    ///
    /// # Panics
    ///
    /// Panics if `height` is not a snapshot height, if a term would be skipped, if the list
    /// is empty or longer than `max_deputy_count`, or if the ranks are not `0..nodes.len()`
    /// in order. Continuing with an inconsistent deputy set would compute quorums against the
    /// wrong count.
    pub fn save_snapshot(&self, height: u64, nodes: DeputyNodes) {
        assert!(
            self.config.is_snapshot_height(height),
            "height {height} is not a snapshot height"
        );
        assert!(!nodes.is_empty(), "empty deputy list at snapshot height {height}");
        assert!(
            nodes.len() <= self.config.max_deputy_count as usize,
            "{} deputies at snapshot height {height} exceed the maximum of {}",
            nodes.len(),
            self.config.max_deputy_count
        );
        for (i, node) in nodes.iter().enumerate() {
            assert!(
                node.rank as usize == i,
                "deputy rank {} at position {i} of snapshot {height}",
                node.rank
            );
        }

        let index = height / self.config.term_duration;
        let mut terms = self.terms.write();
        let len = terms.len() as u64;
        assert!(index <= len, "term {index} saved while only {len} terms are known");

        if index < len {
            warn!(
                target: "dpovp::term",
                term = index,
                dropped = len - index - 1,
                "Overwriting term snapshot"
            );
            terms.truncate(index as usize);
        }

        info!(target: "dpovp::term", term = index, height, deputies = nodes.len(), "Saved term snapshot");
        terms.push(TermRecord { term_index: index, nodes });
    }

    /// Term covering `height`
    pub fn get_term_by_height(&self, height: u64) -> DpovpResult<TermRecord> {
        let index = self.config.term_index(height);
        self.terms.read().get(index as usize).cloned().ok_or(DpovpError::TermNotFound(index))
    }

    /// Term by index
    pub fn get_term_by_index(&self, index: u64) -> Option<TermRecord> {
        self.terms.read().get(index as usize).cloned()
    }

    /// Number of recorded terms
    pub fn term_count(&self) -> usize {
        self.terms.read().len()
    }

    /// Deputies in charge of `height`
    pub fn get_deputies_by_height(&self, height: u64) -> DpovpResult<DeputyNodes> {
        self.get_term_by_height(height).map(|term| term.nodes)
    }

    /// Deputy with the given miner address at `height`
    pub fn get_deputy_by_address(&self, height: u64, address: &Address) -> Option<DeputyNode> {
        self.find_deputy(height, |node| node.miner_address == *address)
    }

    /// Deputy with the given node identity at `height`
    pub fn get_deputy_by_node_id(&self, height: u64, node_id: &NodeId) -> Option<DeputyNode> {
        self.find_deputy(height, |node| node.node_id == *node_id)
    }

    /// Whether `node_id` is a deputy at `height`
    pub fn is_self_deputy(&self, height: u64, node_id: &NodeId) -> bool {
        self.get_deputy_by_node_id(height, node_id).is_some()
    }

    /// Number of deputies at `height`
    pub fn get_deputies_count(&self, height: u64) -> DpovpResult<u32> {
        self.get_term_by_height(height).map(|term| term.deputy_count())
    }

    /// Signers, miner included, a block at `height` needs to become stable
    pub fn two_third_deputy_count(&self, height: u64) -> DpovpResult<u32> {
        self.get_deputies_count(height).map(two_third_count)
    }

    /// Mark `address` as evil until `release_height`
    pub fn set_evil(&self, address: Address, release_height: u64) {
        warn!(target: "dpovp::term", %address, release_height, "Marked evil deputy");
        self.evil.lock().insert(address, release_height);
    }

    /// Whether `address` is marked evil at `current_height`. Expired marks are cleared.
    pub fn is_evil(&self, address: &Address, current_height: u64) -> bool {
        let mut evil = self.evil.lock();
        match evil.get(address).copied() {
            Some(release) if current_height >= release => {
                debug!(target: "dpovp::term", %address, current_height, "Released evil deputy");
                evil.remove(address);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Registry parameters
    pub const fn config(&self) -> &DpovpConfig {
        &self.config
    }

    fn find_deputy(&self, height: u64, pred: impl Fn(&DeputyNode) -> bool) -> Option<DeputyNode> {
        let index = self.config.term_index(height);
        self.terms.read().get(index as usize)?.nodes.iter().find(|node| pred(node)).cloned()
    }
}
