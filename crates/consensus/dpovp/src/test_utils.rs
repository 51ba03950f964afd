//! Test fixtures for DPoVP consensus
//!
//! In-memory collaborators and block builders shared by the unit and integration tests. The
//! mocks produce zero state and log roots and no change logs, so blocks built with
//! [`make_block`] re-execute to the same hash.

use crate::{
    errors::ExecutionError,
    events::{ConsensusEvent, EventSink},
    external::{AccountState, ApplyOutcome, BalanceChange, CandidateLoader, TxExecutor, TxsProduct},
    signer::NodeSigner,
    store::MemoryChainStore,
    Collaborators,
};
use alloy_primitives::{Address, B256, U256};
use dpovp_primitives::{
    change_log_root, deputy_root, tx_root, Block, CandidateProfile, DeputyNode, DeputyNodes, Header,
    Transaction,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Signer of the `index`-th test deputy
///
/// # Panics
///
/// Panics for `index >= 255`.
pub fn deputy_signer(index: u8) -> NodeSigner {
    NodeSigner::from_slice(&[index + 1; 32]).expect("small scalars are valid secret keys")
}

/// Miner address of the `index`-th test deputy
pub const fn deputy_address(index: u8) -> Address {
    Address::with_last_byte(index + 1)
}

/// Ranked deputy list for `signers`, with equal votes
pub fn deputy_nodes(signers: &[NodeSigner]) -> DeputyNodes {
    signers
        .iter()
        .enumerate()
        .map(|(i, signer)| {
            DeputyNode::new(
                deputy_address(i as u8),
                signer.node_id(),
                "127.0.0.1",
                7001 + i as u16,
                i as u32,
                U256::from(100),
            )
        })
        .collect()
}

/// Genesis block embedding the first term's deputies
pub fn genesis_block(nodes: DeputyNodes, time: u64) -> Block {
    let header = Header {
        deputy_root: deputy_root(&nodes),
        gas_limit: 105_000_000,
        time,
        ..Default::default()
    };
    Block::new(header, Vec::new(), Vec::new(), nodes)
}

/// Signed empty block on top of `parent`, consistent with the mock collaborators.
///
/// Only valid below the first snapshot height after genesis.
pub fn make_block(parent: &Block, signer: &NodeSigner, miner: Address, time: u64) -> Block {
    let header = Header {
        parent_hash: parent.hash(),
        miner_address: miner,
        tx_root: tx_root(&[]),
        change_log_root: change_log_root(&[]),
        height: parent.height() + 1,
        gas_limit: parent.header.gas_limit,
        time,
        ..Default::default()
    };
    let mut block = Block::new(header, Vec::new(), Vec::new(), Vec::new());
    block.header.sign_data = Some(signer.sign(&block.hash()));
    block
}

/// Executor that accepts every transaction and burns no gas
#[derive(Debug, Default)]
pub struct NoopExecutor;

impl TxExecutor for NoopExecutor {
    fn process(&self, _header: &Header, _txs: &[Transaction]) -> Result<u64, ExecutionError> {
        Ok(0)
    }

    fn apply_txs(&self, _header: &Header, txs: Vec<Transaction>, _budget: Duration) -> ApplyOutcome {
        ApplyOutcome { selected: txs, rejected: Vec::new(), gas_used: 0 }
    }
}

/// Account values a block can change
#[derive(Debug, Clone, Default)]
struct AccountValues {
    balances: HashMap<Address, U256>,
    deposits: HashMap<Address, U256>,
    votes: HashMap<Address, U256>,
}

#[derive(Debug, Default)]
struct AccountsInner {
    /// Pending values of the current block
    working: AccountValues,
    /// Values the current block started from
    base: AccountValues,
    /// Values before any block, the base of parents that were never saved
    genesis: AccountValues,
    /// Last saved values
    committed: AccountValues,
    saved: HashMap<B256, AccountValues>,
    reward_pools: HashMap<u64, U256>,
    profiles: HashMap<Address, CandidateProfile>,
    votes_for: HashMap<Address, Address>,
}

/// In-memory account layer keeping the values saved at every block
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    inner: Mutex<AccountsInner>,
}

impl MemoryAccounts {
    /// Set the salary pool of `term`
    pub fn set_reward_pool(&self, term: u64, pool: U256) {
        self.inner.lock().reward_pools.insert(term, pool);
    }

    /// Register a candidate
    pub fn set_profile(&self, address: Address, profile: CandidateProfile) {
        self.inner.lock().profiles.insert(address, profile);
    }

    /// Make `voter` vote for `candidate`
    pub fn set_vote(&self, voter: Address, candidate: Address) {
        self.inner.lock().votes_for.insert(voter, candidate);
    }

    /// Lock a candidate deposit before any block
    pub fn set_genesis_deposit(&self, address: Address, amount: U256) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for values in [&mut inner.working, &mut inner.base, &mut inner.genesis, &mut inner.committed] {
            values.deposits.insert(address, amount);
        }
    }

    /// Pending balance of `address`
    pub fn balance(&self, address: &Address) -> U256 {
        self.inner.lock().working.balances.get(address).copied().unwrap_or_default()
    }

    /// Balance of `address` in the last saved block
    pub fn committed_balance(&self, address: &Address) -> U256 {
        self.inner.lock().committed.balances.get(address).copied().unwrap_or_default()
    }

    /// Deposit of `address` in the last saved block
    pub fn committed_deposit(&self, address: &Address) -> U256 {
        self.inner.lock().committed.deposits.get(address).copied().unwrap_or_default()
    }

    /// Number of saved blocks
    pub fn saved_count(&self) -> usize {
        self.inner.lock().saved.len()
    }
}

impl AccountState for MemoryAccounts {
    fn reset(&self, parent_hash: &B256) {
        let mut inner = self.inner.lock();
        let values = inner.saved.get(parent_hash).unwrap_or(&inner.genesis).clone();
        inner.base = values.clone();
        inner.working = values;
    }

    fn term_reward_pool(&self, term: u64) -> Option<U256> {
        self.inner.lock().reward_pools.get(&term).copied()
    }

    fn candidate_profile(&self, address: &Address) -> Option<CandidateProfile> {
        self.inner.lock().profiles.get(address).cloned()
    }

    fn add_balance(&self, address: &Address, amount: U256) {
        let mut inner = self.inner.lock();
        let balance = inner.working.balances.entry(*address).or_default();
        *balance = balance.saturating_add(amount);
    }

    fn candidate_deposit(&self, address: &Address) -> U256 {
        self.inner.lock().working.deposits.get(address).copied().unwrap_or_default()
    }

    fn set_candidate_deposit(&self, address: &Address, amount: U256) {
        self.inner.lock().working.deposits.insert(*address, amount);
    }

    fn vote_for(&self, address: &Address) -> Option<Address> {
        self.inner.lock().votes_for.get(address).copied()
    }

    fn candidate_votes(&self, address: &Address) -> U256 {
        self.inner.lock().working.votes.get(address).copied().unwrap_or_default()
    }

    fn set_candidate_votes(&self, address: &Address, votes: U256) {
        self.inner.lock().working.votes.insert(*address, votes);
    }

    fn balance_changes(&self) -> Vec<BalanceChange> {
        let inner = self.inner.lock();
        let mut changes: Vec<_> = inner
            .working
            .balances
            .iter()
            .filter_map(|(address, new)| {
                let old = inner.base.balances.get(address).copied().unwrap_or_default();
                (old != *new).then_some(BalanceChange { address: *address, old, new: *new })
            })
            .collect();
        changes.sort_by_key(|change| change.address);
        changes
    }

    fn save(&self, hash: &B256) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        let values = inner.working.clone();
        inner.saved.insert(*hash, values.clone());
        inner.base = values.clone();
        inner.committed = values;
        Ok(())
    }

    fn txs_product(&self, txs: Vec<Transaction>, gas_used: u64) -> TxsProduct {
        TxsProduct { txs, gas_used, ..Default::default() }
    }
}

/// Candidate election returning a fixed list
#[derive(Debug, Default)]
pub struct StaticCandidates {
    top: Mutex<DeputyNodes>,
    refunds: Mutex<HashMap<u64, Vec<Address>>>,
}

impl StaticCandidates {
    /// Elect `top` at every snapshot
    pub fn new(top: DeputyNodes) -> Self {
        Self { top: Mutex::new(top), refunds: Mutex::default() }
    }

    /// Replace the elected list
    pub fn set_top(&self, top: DeputyNodes) {
        *self.top.lock() = top;
    }

    /// Refund `candidates` at `height`
    pub fn set_refunds(&self, height: u64, candidates: Vec<Address>) {
        self.refunds.lock().insert(height, candidates);
    }
}

impl CandidateLoader for StaticCandidates {
    fn load_top_candidates(&self, _parent_hash: &B256) -> DeputyNodes {
        self.top.lock().clone()
    }

    fn load_refund_candidates(&self, height: u64) -> Vec<Address> {
        self.refunds.lock().get(&height).cloned().unwrap_or_default()
    }
}

/// Sink recording every event
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ConsensusEvent>>,
}

impl RecordingSink {
    /// Events received so far
    pub fn events(&self) -> Vec<ConsensusEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &ConsensusEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Handles to the mock collaborators behind a [`Collaborators`] set
#[derive(Debug, Clone)]
pub struct MockChain {
    /// Block store
    pub store: Arc<MemoryChainStore>,
    /// Account layer
    pub accounts: Arc<MemoryAccounts>,
    /// Candidate election
    pub candidates: Arc<StaticCandidates>,
}

impl MockChain {
    /// Store seeded with `genesis`, electing `genesis`'s deputies at every snapshot
    pub fn new(genesis: Block) -> Self {
        let candidates = Arc::new(StaticCandidates::new(genesis.deputy_nodes.clone()));
        Self {
            store: Arc::new(MemoryChainStore::new(genesis)),
            accounts: Arc::new(MemoryAccounts::default()),
            candidates,
        }
    }

    /// Collaborators for an engine
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            executor: Arc::new(NoopExecutor),
            accounts: self.accounts.clone(),
            candidates: self.candidates.clone(),
        }
    }
}
