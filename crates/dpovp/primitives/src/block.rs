//! Block header and body.

use crate::{change_log::ChangeLog, deputy::DeputyNodes, sign::SignData, transaction::Transaction};
use alloy_primitives::{keccak256, Address, Bytes, B256};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};

/// Block header.
///
/// The block hash covers every field except the miner's signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Account that produced the block.
    pub miner_address: Address,
    /// Account state root after execution.
    pub version_root: B256,
    /// Merkle root of the transactions.
    pub tx_root: B256,
    /// Root of the execution logs.
    pub log_root: B256,
    /// Merkle root of the account change logs.
    pub change_log_root: B256,
    /// Merkle root of the embedded deputy list. Zero outside snapshot heights.
    pub deputy_root: B256,
    /// Block height.
    pub height: u64,
    /// Gas limit.
    pub gas_limit: u64,
    /// Gas consumed by the transactions.
    pub gas_used: u64,
    /// Unix timestamp in seconds.
    pub time: u64,
    /// Free-form miner data.
    pub extra: Bytes,
    /// Miner's signature over the header hash.
    pub sign_data: Option<SignData>,
}

#[derive(RlpEncodable)]
struct SealFields {
    parent_hash: B256,
    miner_address: Address,
    version_root: B256,
    tx_root: B256,
    log_root: B256,
    change_log_root: B256,
    deputy_root: B256,
    height: u64,
    gas_limit: u64,
    gas_used: u64,
    time: u64,
    extra: Bytes,
}

impl Header {
    /// Hash of the header without its signature.
    pub fn hash(&self) -> B256 {
        let fields = SealFields {
            parent_hash: self.parent_hash,
            miner_address: self.miner_address,
            version_root: self.version_root,
            tx_root: self.tx_root,
            log_root: self.log_root,
            change_log_root: self.change_log_root,
            deputy_root: self.deputy_root,
            height: self.height,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            time: self.time,
            extra: self.extra.clone(),
        };
        keccak256(alloy_rlp::encode(&fields))
    }
}

/// A block: header plus body, confirmations and, at snapshot heights, the next term's deputies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Transactions.
    pub txs: Vec<Transaction>,
    /// Account change logs produced by executing `txs`.
    pub change_logs: Vec<ChangeLog>,
    /// Deputy confirmations, in arrival order.
    pub confirms: Vec<SignData>,
    /// Deputies of the next term. Only set at snapshot heights.
    pub deputy_nodes: DeputyNodes,
}

impl Block {
    /// Create a block without confirmations.
    pub fn new(
        header: Header,
        txs: Vec<Transaction>,
        change_logs: Vec<ChangeLog>,
        deputy_nodes: DeputyNodes,
    ) -> Self {
        Self { header, txs, change_logs, confirms: Vec::new(), deputy_nodes }
    }

    /// Block hash.
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// Block height.
    pub const fn height(&self) -> u64 {
        self.header.height
    }

    /// Parent hash.
    pub const fn parent_hash(&self) -> B256 {
        self.header.parent_hash
    }

    /// Producer of the block.
    pub const fn miner_address(&self) -> Address {
        self.header.miner_address
    }

    /// Block timestamp.
    pub const fn time(&self) -> u64 {
        self.header.time
    }

    /// Append a confirmation unless the same signature is already present.
    ///
    /// Returns whether the signature was added.
    pub fn add_confirm(&mut self, sig: SignData) -> bool {
        if self.confirms.contains(&sig) {
            return false
        }
        self.confirms.push(sig);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header {
            parent_hash: B256::with_last_byte(1),
            miner_address: Address::with_last_byte(2),
            height: 10,
            gas_limit: 100_000,
            time: 1_540_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_ignores_signature() {
        let h = header();
        let mut signed = h.clone();
        signed.sign_data = Some(SignData::new([7u8; 65]));
        assert_eq!(h.hash(), signed.hash());
    }

    #[test]
    fn test_hash_covers_extra_and_time() {
        let h = header();
        let mut other = h.clone();
        other.extra = Bytes::from_static(b"x");
        assert_ne!(h.hash(), other.hash());

        let mut other = h.clone();
        other.time += 1;
        assert_ne!(h.hash(), other.hash());
    }

    #[test]
    fn test_block_hash_ignores_body_and_confirms() {
        let mut block = Block::new(header(), vec![], vec![], vec![]);
        let hash = block.hash();
        block.add_confirm(SignData::new([1u8; 65]));
        assert_eq!(block.hash(), hash);
    }

    #[test]
    fn test_add_confirm_dedup() {
        let mut block = Block::new(header(), vec![], vec![], vec![]);
        assert!(block.add_confirm(SignData::new([1u8; 65])));
        assert!(!block.add_confirm(SignData::new([1u8; 65])));
        assert!(block.add_confirm(SignData::new([2u8; 65])));
        assert_eq!(block.confirms.len(), 2);
    }
}
