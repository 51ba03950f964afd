//! Transactions carried in block bodies.
//!
//! The consensus core never executes transactions; it only commits to them through the
//! transaction root. The kinds form a closed set so the executor can dispatch exhaustively.

use crate::{merkle::merkle_root, sign::NodeId};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// Maximum length of a candidate's advertised host.
pub const MAX_HOST_LENGTH: usize = 128;

/// Errors raised while decoding a transaction payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxDecodeError {
    /// Unknown type code
    #[error("unknown transaction type {0}")]
    UnknownType(u8),

    /// Payload is not valid RLP for its type
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Candidate registration without a node id
    #[error("candidate node id is required")]
    MissingNodeId,

    /// Candidate host empty or too long
    #[error("invalid candidate host length {0}")]
    InvalidHost(usize),

    /// Candidate port is zero
    #[error("candidate port must be non-zero")]
    InvalidPort,
}

/// Registration fields of a deputy candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    /// Where term salaries are paid. Falls back to the miner address when absent.
    pub income_address: Option<Address>,
    /// Network identity the candidate will sign with.
    pub node_id: NodeId,
    /// Advertised host.
    pub host: String,
    /// Advertised port.
    pub port: u16,
    /// Whether this registration withdraws the candidacy.
    pub is_cancel: bool,
}

#[derive(RlpEncodable, RlpDecodable)]
struct CandidateProfileRlp {
    income_address: Address,
    node_id: NodeId,
    host: Bytes,
    port: u16,
    is_cancel: bool,
}

impl CandidateProfile {
    /// Build a profile, enforcing the required fields.
    pub fn new(
        income_address: Option<Address>,
        node_id: NodeId,
        host: impl Into<String>,
        port: u16,
        is_cancel: bool,
    ) -> Result<Self, TxDecodeError> {
        let host = host.into();
        if node_id.is_zero() {
            return Err(TxDecodeError::MissingNodeId)
        }
        if host.is_empty() || host.len() > MAX_HOST_LENGTH {
            return Err(TxDecodeError::InvalidHost(host.len()))
        }
        if port == 0 {
            return Err(TxDecodeError::InvalidPort)
        }
        Ok(Self { income_address, node_id, host, port, is_cancel })
    }

    fn encode(&self) -> Bytes {
        let rlp = CandidateProfileRlp {
            income_address: self.income_address.unwrap_or(Address::ZERO),
            node_id: self.node_id,
            host: Bytes::copy_from_slice(self.host.as_bytes()),
            port: self.port,
            is_cancel: self.is_cancel,
        };
        alloy_rlp::encode(&rlp).into()
    }

    fn decode(mut payload: &[u8]) -> Result<Self, TxDecodeError> {
        let rlp = CandidateProfileRlp::decode(&mut payload)
            .map_err(|e| TxDecodeError::Malformed(e.to_string()))?;
        let host = String::from_utf8(rlp.host.to_vec())
            .map_err(|e| TxDecodeError::Malformed(e.to_string()))?;
        let income_address = (!rlp.income_address.is_zero()).then_some(rlp.income_address);
        Self::new(income_address, rlp.node_id, host, rlp.port, rlp.is_cancel)
    }
}

/// Closed set of transaction kinds.
///
/// Asset payloads are opaque to consensus and interpreted by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Plain value transfer
    Transfer,
    /// Vote for the candidate in `to`
    Vote,
    /// Register, update or cancel a deputy candidacy
    RegisterCandidate(CandidateProfile),
    /// Create an asset class
    CreateAsset(Bytes),
    /// Issue units of an asset
    IssueAsset(Bytes),
    /// Add supply to an issued asset
    ReplenishAsset(Bytes),
    /// Modify asset metadata
    ModifyAsset(Bytes),
    /// Move asset units between accounts
    TransferAsset(Bytes),
}

impl TxKind {
    /// Numeric type code used in the transaction hash.
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::Transfer => 0,
            Self::Vote => 1,
            Self::RegisterCandidate(_) => 2,
            Self::CreateAsset(_) => 3,
            Self::IssueAsset(_) => 4,
            Self::ReplenishAsset(_) => 5,
            Self::ModifyAsset(_) => 6,
            Self::TransferAsset(_) => 7,
        }
    }

    /// Encoded payload of the kind.
    pub fn payload(&self) -> Bytes {
        match self {
            Self::Transfer | Self::Vote => Bytes::new(),
            Self::RegisterCandidate(profile) => profile.encode(),
            Self::CreateAsset(data) |
            Self::IssueAsset(data) |
            Self::ReplenishAsset(data) |
            Self::ModifyAsset(data) |
            Self::TransferAsset(data) => data.clone(),
        }
    }

    /// Decode a kind from its type code and payload, validating candidate fields.
    pub fn from_parts(type_code: u8, payload: Bytes) -> Result<Self, TxDecodeError> {
        Ok(match type_code {
            0 => Self::Transfer,
            1 => Self::Vote,
            2 => Self::RegisterCandidate(CandidateProfile::decode(&payload)?),
            3 => Self::CreateAsset(payload),
            4 => Self::IssueAsset(payload),
            5 => Self::ReplenishAsset(payload),
            6 => Self::ModifyAsset(payload),
            7 => Self::TransferAsset(payload),
            other => return Err(TxDecodeError::UnknownType(other)),
        })
    }
}

/// A transaction in a block body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// What the transaction does.
    pub kind: TxKind,
    /// Sender.
    pub from: Address,
    /// Recipient, if any.
    pub to: Option<Address>,
    /// Transferred value.
    pub amount: U256,
    /// Gas allowance.
    pub gas_limit: u64,
    /// Price per gas unit.
    pub gas_price: U256,
    /// Unix time after which the transaction may not be included.
    pub expiration: u64,
}

#[derive(RlpEncodable)]
struct TransactionRlp {
    type_code: u8,
    from: Address,
    to: Address,
    amount: U256,
    gas_limit: u64,
    gas_price: U256,
    expiration: u64,
    payload: Bytes,
}

impl Transaction {
    /// Transaction hash.
    pub fn hash(&self) -> B256 {
        let rlp = TransactionRlp {
            type_code: self.kind.type_code(),
            from: self.from,
            to: self.to.unwrap_or(Address::ZERO),
            amount: self.amount,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
            expiration: self.expiration,
            payload: self.kind.payload(),
        };
        keccak256(alloy_rlp::encode(&rlp))
    }
}

/// Merkle root over transaction hashes.
pub fn tx_root(txs: &[Transaction]) -> B256 {
    merkle_root(txs.iter().map(Transaction::hash))
}
