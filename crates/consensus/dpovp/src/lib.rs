//! DPoVP Consensus Implementation
//!
//! This crate implements the consensus core of a chain produced by a rotating set of deputy
//! nodes (delegated proof of voting power). It decides who may mine at a height, when a block
//! gathered enough confirmations to become stable, and which fork the node follows.
//!
//! ## Architecture
//!
//! - [`TermRegistry`] - Deputy lists per term, with evil-miner bookkeeping
//! - [`schedule`] - Round-robin mining slots derived from deputy ranks
//! - [`Validator`] - Received block, confirmation and double-production checks
//! - [`Confirmer`] - Signs confirmations for blocks the node follows
//! - [`ForkManager`] - Head pointer and fork choice over unstable blocks
//! - [`StableManager`] - Quorum evaluation and finality
//! - [`BlockAssembler`] - Header preparation, sealing and term rewards
//! - [`Dpovp`] - Orchestrates mining, block insertion and confirmation handling

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod assembler;
mod config;
mod confirmer;
mod dpovp;
mod errors;
mod events;
mod external;
mod fork;
mod reward;
pub mod schedule;
mod signer;
mod stable;
mod store;
mod term;
pub mod test_utils;
mod validator;

#[cfg(test)]
mod tests;

pub use assembler::{calc_gas_limit, BlockAssembler};
pub use config::DpovpConfig;
pub use confirmer::{BlockConfirmData, BlockConfirms, Confirmer, SignedRecord};
pub use dpovp::{Collaborators, Dpovp, MinedBlock};
pub use errors::{DpovpError, DpovpResult, ExecutionError, InsertOutcome, StoreError};
pub use events::{ConsensusEvent, EventSink, EventWorker, OutboundHandle};
pub use external::{
    ApplyOutcome, AccountState, BalanceChange, CandidateLoader, TxExecutor, TxsProduct,
};
pub use fork::ForkManager;
pub use reward::{calculate_salaries, DeputySalary};
pub use signer::NodeSigner;
pub use stable::{is_confirm_enough, StableManager};
pub use store::{ChainStore, MemoryChainStore};
pub use term::{TermRecord, TermRegistry};
pub use validator::Validator;

/// DPoVP constants
pub mod constants {
    /// Default term length in blocks
    pub const DEFAULT_TERM_DURATION: u64 = 1_000_000;

    /// Default blocks between a snapshot and the term switch
    pub const DEFAULT_INTERIM_DURATION: u64 = 1_000;

    /// Default offset into a term where the reward pool is checked
    pub const DEFAULT_REWARD_CHECK_HEIGHT: u64 = 100_000;

    /// Default mining slot length in milliseconds
    pub const DEFAULT_MINE_TIMEOUT_MS: u64 = 10_000;

    /// Maximum header extra bytes
    pub const MAX_EXTRA_LENGTH: usize = 256;

    /// Default upper bound on deputies per term
    pub const DEFAULT_MAX_DEPUTY_COUNT: u32 = 17;

    /// Confirmations of blocks older than this many seconds are not broadcast
    pub const DEFAULT_CONFIRM_BROADCAST_MAX_AGE_SECS: u64 = 180;

    /// Default blocks an evil miner stays marked
    pub const DEFAULT_EVIL_RELEASE_INTERVAL: u64 = 1_000;

    /// Slack in milliseconds when checking mining slots against second-granularity timestamps
    pub const MINE_SLOT_SLACK_MS: u64 = 1_000;

    /// Seconds a block timestamp may trail its parent's
    pub const PARENT_TIME_TOLERANCE_SECS: u64 = 1;
}

/// Helper function to check if a block embeds the next term's deputies
pub const fn is_snapshot_height(height: u64, term_duration: u64) -> bool {
    height % term_duration == 0
}

/// Helper function to calculate the term index covering a block
///
/// The deputies elected at snapshot `k * term_duration` take over `interim_duration` blocks
/// later, so the first term also covers the first interim of the second.
pub const fn term_index_of(height: u64, term_duration: u64, interim_duration: u64) -> u64 {
    if height <= term_duration + interim_duration {
        0
    } else {
        (height - interim_duration - 1) / term_duration
    }
}

/// Number of signers, miner included, a block needs to become stable
pub const fn two_third_count(deputy_count: u32) -> u32 {
    (deputy_count * 2 + 2) / 3
}
