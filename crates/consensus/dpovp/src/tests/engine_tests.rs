//! Engine tests: mining, fork switching and restart

use super::helpers::{miner, resign, test_config, TestNet, OUTSIDER};
use crate::{
    test_utils::{deputy_signer, MockChain},
    BlockConfirmData, ChainStore, ConsensusEvent, Dpovp, DpovpError, InsertOutcome, MemoryChainStore,
    StoreError,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use assert_matches::assert_matches;
use dpovp_primitives::{Block, SignData};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

const BUDGET: Duration = Duration::from_millis(50);

#[test]
fn test_single_deputy_mines_stable_blocks() {
    let net = TestNet::new(1, 0);

    let first = net.engine.mine_block(vec![], Bytes::new(), BUDGET).unwrap();
    assert_eq!(first.block.height(), 1);
    assert_eq!(first.block.miner_address(), miner(0));
    assert!(first.rejected.is_empty());
    let seal = first.block.header.sign_data.unwrap();
    assert_eq!(seal.recover_node(&first.block.hash()).unwrap(), deputy_signer(0).node_id());

    let second = net.engine.mine_block(vec![], Bytes::from_static(b"dpovp"), BUDGET).unwrap();
    assert_eq!(second.block.parent_hash(), first.block.hash());
    assert_eq!(net.engine.head_block().hash(), second.block.hash());
    // one deputy is its own quorum
    assert_eq!(net.engine.stable_block().unwrap().hash(), second.block.hash());
    assert_eq!(net.chain.accounts.saved_count(), 2);

    let events = net.drain_events();
    assert!(events.contains(&ConsensusEvent::MinedBlock(first.block.clone())));
    assert!(events.contains(&ConsensusEvent::HeadBlockChanged(second.block.clone())));
    assert!(events.iter().any(|event| matches!(event, ConsensusEvent::StableBlockChanged { .. })));

    // another node accepts what was mined
    let observer =
        TestNet::with_chain(MockChain::new(net.genesis.clone()), net.genesis.clone(), net.nodes.clone(), OUTSIDER);
    assert!(observer.engine.insert_block(first.block).is_ok());
    assert!(observer.engine.insert_block(second.block.clone()).is_ok());
    assert_eq!(observer.engine.stable_block().unwrap().hash(), second.block.hash());
}

#[test]
fn test_mining_requires_deputy() {
    let net = TestNet::new(3, OUTSIDER);
    assert_matches!(net.engine.mine_block(vec![], Bytes::new(), BUDGET), Err(DpovpError::NotDeputy(1)));
    assert_matches!(net.engine.mine_window(0), Err(DpovpError::NotDeputy(1)));
}

#[test]
fn test_mining_rejects_long_extra() {
    let net = TestNet::new(1, 0);
    assert_matches!(
        net.engine.mine_block(vec![], Bytes::from(vec![1u8; 300]), BUDGET),
        Err(DpovpError::ExtraTooLong { len: 300, .. })
    );
    assert_eq!(net.engine.head_block().height(), 0);
}

#[test]
fn test_mine_window_follows_rank() {
    let net = TestNet::new(3, 1);
    let parent_ms = net.genesis.time() * 1000;
    assert_eq!(net.engine.mine_window(parent_ms + 1_000).unwrap(), (parent_ms + 10_000, parent_ms + 20_000));
    // the slot passed, wait a round
    assert_eq!(
        net.engine.mine_window(parent_ms + 20_000).unwrap(),
        (parent_ms + 40_000, parent_ms + 50_000)
    );
}

#[test]
fn test_switches_to_longer_fork_at_quorum_distance() {
    let net = TestNet::new(3, OUTSIDER);
    let b1 = net.block(&net.genesis, 0, 5);
    let b2 = net.block(&b1, 1, 10);
    let b3a = net.block(&b2, 2, 15);
    let b3b = net.block(&b2, 0, 25);
    let b4b = net.block(&b3b, 1, 30);
    for block in [&b1, &b2, &b3a, &b3b] {
        net.engine.insert_block(block.clone()).unwrap();
    }
    assert_eq!(net.engine.head_block().hash(), b3a.hash());

    net.engine.insert_block(b4b.clone()).unwrap();
    assert_eq!(net.engine.head_block().hash(), b4b.hash());
    let events = net.drain_events();
    assert!(events.contains(&ConsensusEvent::HeadBlockChanged(b4b)));
}

#[test]
fn test_stable_side_fork_replaces_head() {
    let net = TestNet::new(3, OUTSIDER);
    let b1 = net.block(&net.genesis, 0, 5);
    let b2 = net.block(&b1, 1, 10);
    let b3a = net.block(&b2, 2, 15);
    let b3b = net.block(&b2, 0, 25);
    for block in [&b1, &b2, &b3a, &b3b] {
        net.engine.insert_block(block.clone()).unwrap();
    }
    assert_eq!(net.engine.head_block().hash(), b3a.hash());

    let hash = b3b.hash();
    let sign_data = deputy_signer(1).sign(&hash);
    net.engine.insert_confirm(BlockConfirmData { hash, height: 3, sign_data }).unwrap();

    assert_eq!(net.engine.stable_block().unwrap().hash(), hash);
    assert_eq!(net.engine.head_block().hash(), hash);
    assert_eq!(net.chain.store.fork_heads(), vec![hash]);
    assert!(!net.chain.store.is_exist_by_hash(&b3a.hash()));

    let events = net.drain_events();
    let pruned = events.iter().find_map(|event| match event {
        ConsensusEvent::StableBlockChanged { block, pruned } if block.hash() == hash => Some(pruned.clone()),
        _ => None,
    });
    assert_eq!(pruned, Some(vec![b3a]));
}

#[test]
fn test_restart_picks_best_stored_fork() {
    let net = TestNet::new(3, OUTSIDER);
    let b1 = net.block(&net.genesis, 0, 5);
    let b2 = net.block(&b1, 1, 10);
    net.chain.store.set_block(b1.hash(), b1).unwrap();
    net.chain.store.set_block(b2.hash(), b2.clone()).unwrap();

    let restarted = TestNet::with_chain(net.chain.clone(), net.genesis.clone(), net.nodes.clone(), OUTSIDER);
    assert_eq!(restarted.engine.head_block().hash(), b2.hash());
    assert_eq!(restarted.engine.stable_block().unwrap().hash(), net.genesis.hash());
    assert_eq!(restarted.engine.term_registry().term_count(), 1);
}

/// Store whose writes of new blocks can be made to fail
#[derive(Debug)]
struct FlakyStore {
    inner: Arc<MemoryChainStore>,
    fail_writes: AtomicBool,
}

impl ChainStore for FlakyStore {
    fn get_block_by_hash(&self, hash: &B256) -> Result<Block, StoreError> {
        self.inner.get_block_by_hash(hash)
    }

    fn get_block_by_height(&self, height: u64) -> Result<Block, StoreError> {
        self.inner.get_block_by_height(height)
    }

    fn get_unconfirm_by_height(&self, height: u64, leaf_hash: &B256) -> Result<Block, StoreError> {
        self.inner.get_unconfirm_by_height(height, leaf_hash)
    }

    fn iterate_unconfirms(&self, f: &mut dyn FnMut(&Block)) {
        self.inner.iterate_unconfirms(f)
    }

    fn is_exist_by_hash(&self, hash: &B256) -> bool {
        self.inner.is_exist_by_hash(hash)
    }

    fn set_block(&self, hash: B256, block: Block) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".into()))
        }
        self.inner.set_block(hash, block)
    }

    fn set_confirms(&self, hash: &B256, sigs: &[SignData]) -> Result<(), StoreError> {
        self.inner.set_confirms(hash, sigs)
    }

    fn set_stable_block(&self, hash: &B256) -> Result<Vec<Block>, StoreError> {
        self.inner.set_stable_block(hash)
    }

    fn load_latest_block(&self) -> Result<Block, StoreError> {
        self.inner.load_latest_block()
    }
}

#[test]
fn test_failed_write_leaves_terms_untouched() {
    let net = TestNet::new(1, OUTSIDER);
    let store = Arc::new(FlakyStore { inner: net.chain.store.clone(), fail_writes: AtomicBool::new(false) });
    let mut collaborators = net.chain.collaborators();
    collaborators.store = store.clone();
    let config = test_config().with_term(4, 2).with_reward_check_height(3);
    let engine = Dpovp::new(config, deputy_signer(0), collaborators, vec![]).unwrap();

    for _ in 0..3 {
        engine.mine_block(vec![], Bytes::new(), BUDGET).unwrap();
    }

    // block 4 embeds the next term
    store.fail_writes.store(true, Ordering::SeqCst);
    let err = engine.mine_block(vec![], Bytes::new(), BUDGET).unwrap_err();
    assert!(err.is_persistence_failure());
    assert_eq!(engine.term_registry().term_count(), 1);
    assert_eq!(engine.head_block().height(), 3);

    store.fail_writes.store(false, Ordering::SeqCst);
    let mined = engine.mine_block(vec![], Bytes::new(), BUDGET).unwrap();
    assert_eq!(mined.block.height(), 4);
    assert_eq!(engine.term_registry().term_count(), 2);
}

#[test]
fn test_rejected_block_leaves_accounts_untouched() {
    let net = TestNet::new(3, OUTSIDER);
    let quitter = Address::with_last_byte(0xd0);
    net.chain.accounts.set_genesis_deposit(quitter, U256::from(500));
    net.chain.candidates.set_refunds(1, vec![quitter]);

    let mut forged = net.block(&net.genesis, 0, 5);
    forged.header.version_root = B256::with_last_byte(1);
    assert_matches!(net.engine.insert_block(resign(forged, 0)), Err(DpovpError::HashMismatch { .. }));
    assert_eq!(net.chain.accounts.saved_count(), 0);
    assert_eq!(net.chain.accounts.committed_balance(&quitter), U256::ZERO);
    assert_eq!(net.chain.accounts.committed_deposit(&quitter), U256::from(500));

    let b1 = net.block(&net.genesis, 0, 5);
    assert_eq!(net.engine.insert_block(b1).unwrap(), InsertOutcome::Accepted);
    assert_eq!(net.chain.accounts.committed_balance(&quitter), U256::from(500));
    assert_eq!(net.chain.accounts.committed_deposit(&quitter), U256::ZERO);

    // a sibling executes on the genesis state, so the deposit is refunded once per fork
    let sibling = net.block(&net.genesis, 0, 35);
    assert_eq!(net.engine.insert_block(sibling).unwrap(), InsertOutcome::Accepted);
    assert_eq!(net.chain.accounts.committed_balance(&quitter), U256::from(500));
    assert_eq!(net.chain.accounts.saved_count(), 2);
}
