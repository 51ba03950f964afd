//! DPoVP Consensus Errors

use alloy_primitives::{Address, B256};
use dpovp_primitives::{NodeId, SignError};

/// Errors reported by the block/confirm store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Block not found
    #[error("block {0} not found")]
    NotFound(B256),

    /// No block at this height
    #[error("no block at height {0}")]
    HeightNotFound(u64),

    /// Block already stored
    #[error("block {0} already exists")]
    AlreadyExists(B256),

    /// Stable block would move backwards
    #[error("block {hash} at height {height} is below the stable block at {stable}")]
    BelowStable {
        /// Rejected block
        hash: B256,
        /// Its height
        height: u64,
        /// Current stable height
        stable: u64,
    },

    /// Backend failure
    #[error("{0}")]
    Backend(String),
}

/// Errors reported by the transaction executor and account layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// A transaction failed to apply
    #[error("transaction {hash} failed: {reason}")]
    InvalidTransaction {
        /// Failed transaction
        hash: B256,
        /// Executor reason
        reason: String,
    },

    /// Gas accounting exceeded the block limit
    #[error("gas used {used} exceeds limit {limit}")]
    GasLimitExceeded {
        /// Gas consumed
        used: u64,
        /// Header limit
        limit: u64,
    },

    /// Account layer failure
    #[error("{0}")]
    State(String),
}

/// DPoVP-specific error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DpovpError {
    /// The registry has not seen the snapshot for this term yet
    #[error("term {0} not found")]
    TermNotFound(u64),

    /// Local node is not a deputy at this height
    #[error("not a deputy at height {0}")]
    NotDeputy(u64),

    /// Block not found
    #[error("block {0} not found")]
    BlockNotFound(B256),

    /// Height 0 has no miner
    #[error("genesis block has no miner")]
    GenesisHasNoMiner,

    /// Confirmation signature cannot be recovered
    #[error("invalid confirm signature: {0}")]
    InvalidConfirmSig(SignError),

    /// Confirmation signed by a node that is not a deputy
    #[error("confirm signer {0} is not a deputy")]
    ConfirmNotDeputy(NodeId),

    /// Deputy already confirmed this block
    #[error("deputy {0} already confirmed the block")]
    DuplicateConfirm(NodeId),

    /// Miner signed a confirmation of its own block
    #[error("confirm signed by the block miner")]
    ConfirmFromMiner,

    /// Nothing new in a confirmation packet
    #[error("no new confirms")]
    NoNewConfirms,

    /// Parent block is unknown
    #[error("unknown parent {0}")]
    UnknownParent(B256),

    /// Header has no signature
    #[error("missing header signature")]
    MissingSignData,

    /// Header signature does not recover to a deputy
    #[error("invalid block signer")]
    InvalidSigner,

    /// Signer is a deputy but not the declared miner
    #[error("signer {signer} does not match miner {miner}")]
    MinerMismatch {
        /// Miner address of the recovered signer
        signer: Address,
        /// Declared miner address
        miner: Address,
    },

    /// Transaction root mismatch
    #[error("tx root mismatch")]
    TxRootMismatch,

    /// Height is not parent height + 1
    #[error("invalid height: expected {expected}, got {got}")]
    HeightMismatch {
        /// parent height + 1
        expected: u64,
        /// Block height
        got: u64,
    },

    /// Block timestamp too far in the future
    #[error("block time {time} is ahead of local time {now}")]
    FutureBlock {
        /// Block time
        time: u64,
        /// Local time
        now: u64,
    },

    /// Block timestamp before its parent
    #[error("block time {time} is before parent time {parent}")]
    TimestampBeforeParent {
        /// Block time
        time: u64,
        /// Parent time
        parent: u64,
    },

    /// Embedded deputy list does not match
    #[error("deputy root mismatch")]
    DeputyRootMismatch,

    /// Snapshot block embeds more deputies than a term may have
    #[error("{count} deputies exceed the maximum of {max}")]
    TooManyDeputies {
        /// Embedded deputies
        count: usize,
        /// Configured maximum
        max: u32,
    },

    /// Extra data too long
    #[error("extra data too long: {len} > {max}")]
    ExtraTooLong {
        /// Extra length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Block produced outside the miner's slot
    #[error("miner {miner} mined outside its slot")]
    MineSlotMismatch {
        /// Block miner
        miner: Address,
    },

    /// Recomputed block hash differs
    #[error("block hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// Received hash
        expected: B256,
        /// Locally computed hash
        computed: B256,
    },

    /// Change log root mismatch
    #[error("change log root mismatch")]
    ChangeLogRootMismatch,

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Executor or account layer failure
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl DpovpError {
    /// Whether the error rejects a received block as invalid.
    pub const fn is_invalid_block(&self) -> bool {
        matches!(
            self,
            Self::UnknownParent(_) |
                Self::MissingSignData |
                Self::InvalidSigner |
                Self::MinerMismatch { .. } |
                Self::TxRootMismatch |
                Self::HeightMismatch { .. } |
                Self::FutureBlock { .. } |
                Self::TimestampBeforeParent { .. } |
                Self::DeputyRootMismatch |
                Self::TooManyDeputies { .. } |
                Self::ExtraTooLong { .. } |
                Self::MineSlotMismatch { .. } |
                Self::HashMismatch { .. } |
                Self::ChangeLogRootMismatch |
                Self::Execution(_)
        )
    }

    /// Whether the error comes from the store.
    pub const fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Result type for DPoVP operations
pub type DpovpResult<T> = Result<T, DpovpError>;

/// Outcome of inserting a received block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Block verified and stored
    Accepted,
    /// Block already known or not above the stable block
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let invalid = [
            DpovpError::UnknownParent(B256::ZERO),
            DpovpError::TooManyDeputies { count: 18, max: 17 },
            DpovpError::HashMismatch { expected: B256::ZERO, computed: B256::with_last_byte(1) },
            DpovpError::Execution(ExecutionError::State("bad nonce".into())),
        ];
        for err in &invalid {
            assert!(err.is_invalid_block(), "{err}");
            assert!(!err.is_persistence_failure(), "{err}");
        }

        let store = DpovpError::from(StoreError::Backend("disk full".into()));
        assert!(store.is_persistence_failure());
        assert!(!store.is_invalid_block());

        assert!(!DpovpError::NoNewConfirms.is_invalid_block());
        assert!(!DpovpError::TermNotFound(3).is_persistence_failure());
    }
}
