//! Collaborators the consensus core consumes but does not implement: transaction execution,
//! account state and candidate election.

use crate::errors::ExecutionError;
use alloy_primitives::{Address, B256, U256};
use dpovp_primitives::{CandidateProfile, ChangeLog, DeputyNodes, Header, Transaction};
use std::{fmt::Debug, time::Duration};

/// Result of selecting transactions for a new block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Transactions applied, in block order
    pub selected: Vec<Transaction>,
    /// Transactions that failed and should be dropped from the pool
    pub rejected: Vec<Transaction>,
    /// Gas consumed by `selected`
    pub gas_used: u64,
}

/// Executor output committed to by a sealed header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxsProduct {
    /// Transactions in block order
    pub txs: Vec<Transaction>,
    /// Gas consumed
    pub gas_used: u64,
    /// Account state root
    pub version_root: B256,
    /// Execution log root
    pub log_root: B256,
    /// Account mutations
    pub change_logs: Vec<ChangeLog>,
}

/// Balance of an account before and after the current block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    /// Account
    pub address: Address,
    /// Balance at the parent block
    pub old: U256,
    /// Current balance
    pub new: U256,
}

/// Transaction executor
pub trait TxExecutor: Send + Sync + Debug {
    /// Apply every transaction of a received block, returning the gas used
    fn process(&self, header: &Header, txs: &[Transaction]) -> Result<u64, ExecutionError>;

    /// Select and apply pool transactions for a new block until `budget` elapses
    fn apply_txs(&self, header: &Header, txs: Vec<Transaction>, budget: Duration) -> ApplyOutcome;
}

/// Account layer the executor writes to during the current block.
///
/// Changes stay pending until [`AccountState::save`]. [`AccountState::reset`] drops them and
/// continues from a saved block, so a rejected block leaves no trace and sibling forks start
/// from their own parent.
pub trait AccountState: Send + Sync + Debug {
    /// Drop pending changes and continue from the state saved at `parent_hash`
    fn reset(&self, parent_hash: &B256);

    /// Salary pool of a term, if it was set
    fn term_reward_pool(&self, term: u64) -> Option<U256>;

    /// Registration of a candidate
    fn candidate_profile(&self, address: &Address) -> Option<CandidateProfile>;

    /// Credit an account
    fn add_balance(&self, address: &Address, amount: U256);

    /// Deposit locked by a candidate
    fn candidate_deposit(&self, address: &Address) -> U256;

    /// Overwrite a candidate's deposit
    fn set_candidate_deposit(&self, address: &Address, amount: U256);

    /// Candidate an account votes for
    fn vote_for(&self, address: &Address) -> Option<Address>;

    /// Vote weight of a candidate
    fn candidate_votes(&self, address: &Address) -> U256;

    /// Overwrite a candidate's vote weight
    fn set_candidate_votes(&self, address: &Address, votes: U256);

    /// Balances changed since the state the block started from
    fn balance_changes(&self) -> Vec<BalanceChange>;

    /// Commit the pending changes as the state of block `hash`
    fn save(&self, hash: &B256) -> Result<(), ExecutionError>;

    /// Roots and change logs of the current block
    fn txs_product(&self, txs: Vec<Transaction>, gas_used: u64) -> TxsProduct;
}

/// Candidate election
pub trait CandidateLoader: Send + Sync + Debug {
    /// Top candidates by votes, ranked, as of `parent_hash`
    fn load_top_candidates(&self, parent_hash: &B256) -> DeputyNodes;

    /// Candidates who cancelled their candidacy and get their deposit back at `height`
    fn load_refund_candidates(&self, height: u64) -> Vec<Address>;
}
