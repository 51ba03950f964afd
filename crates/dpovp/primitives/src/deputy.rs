//! Deputy nodes: the validators of one term.

use crate::{merkle::merkle_root, sign::NodeId};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};

/// One validator of a term.
///
/// The `rank` is the node's 0-based position in the term's turn order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeputyNode {
    /// Account address that produces blocks.
    pub miner_address: Address,
    /// Network identity used to sign headers and confirmations.
    pub node_id: NodeId,
    /// Advertised host.
    pub ip: String,
    /// Advertised port.
    pub port: u16,
    /// Turn order position, starting at 0.
    pub rank: u32,
    /// Vote weight at the time of the snapshot.
    pub votes: U256,
}

/// Ordered deputy list of a term.
pub type DeputyNodes = Vec<DeputyNode>;

#[derive(RlpEncodable)]
struct DeputyNodeRlp {
    miner_address: Address,
    node_id: NodeId,
    ip: Bytes,
    port: u16,
    rank: u32,
    votes: U256,
}

impl DeputyNode {
    /// Create a deputy node.
    pub fn new(
        miner_address: Address,
        node_id: NodeId,
        ip: impl Into<String>,
        port: u16,
        rank: u32,
        votes: U256,
    ) -> Self {
        Self { miner_address, node_id, ip: ip.into(), port, rank, votes }
    }

    /// Hash of the RLP encoding of every field.
    pub fn hash(&self) -> B256 {
        let rlp = DeputyNodeRlp {
            miner_address: self.miner_address,
            node_id: self.node_id,
            ip: Bytes::copy_from_slice(self.ip.as_bytes()),
            port: self.port,
            rank: self.rank,
            votes: self.votes,
        };
        keccak256(alloy_rlp::encode(&rlp))
    }
}

/// Merkle root committing to an ordered deputy list.
pub fn deputy_root(nodes: &[DeputyNode]) -> B256 {
    merkle_root(nodes.iter().map(DeputyNode::hash))
}
