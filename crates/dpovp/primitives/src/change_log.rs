//! Account change logs produced by transaction execution.

use crate::merkle::merkle_root;
use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};

/// One account mutation recorded while executing a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
pub struct ChangeLog {
    /// Mutated account.
    pub address: Address,
    /// Kind of mutation, owned by the account layer.
    pub log_type: u32,
    /// Account version after the mutation.
    pub version: u32,
    /// Encoded new value.
    pub new_value: Bytes,
    /// Encoded auxiliary data.
    pub extra: Bytes,
}

impl ChangeLog {
    /// Hash of the RLP encoding.
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }
}

/// Merkle root over change log hashes.
pub fn change_log_root(logs: &[ChangeLog]) -> B256 {
    merkle_root(logs.iter().map(ChangeLog::hash))
}
