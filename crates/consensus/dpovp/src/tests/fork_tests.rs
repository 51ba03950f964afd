//! Fork choice tests

use super::helpers::{registry_with, test_config};
use crate::{ChainStore, ForkManager, MemoryChainStore};
use dpovp_primitives::{Block, Header};
use std::sync::Arc;

fn child(parent: &Block, nonce: u8) -> Block {
    let header = Header {
        parent_hash: parent.hash(),
        height: parent.height() + 1,
        extra: vec![nonce].into(),
        ..Default::default()
    };
    Block::new(header, vec![], vec![], vec![])
}

fn setup() -> (Block, Arc<MemoryChainStore>, ForkManager) {
    let genesis = Block::default();
    let store = Arc::new(MemoryChainStore::new(genesis.clone()));
    let registry = Arc::new(registry_with(test_config(), 3));
    let fork = ForkManager::new(genesis.clone(), registry, store.clone());
    (genesis, store, fork)
}

fn insert(store: &MemoryChainStore, block: &Block) {
    store.set_block(block.hash(), block.clone()).unwrap();
}

#[test]
fn test_choose_new_fork_prefers_height_then_smallest_hash() {
    let (genesis, store, fork) = setup();
    assert!(fork.choose_new_fork().is_none());

    let b1 = child(&genesis, 0);
    let b2a = child(&b1, 1);
    let b2b = child(&b1, 2);
    for block in [&b1, &b2a, &b2b] {
        insert(&store, block);
    }

    let best = fork.choose_new_fork().unwrap();
    assert_eq!(best.height(), 2);
    assert_eq!(best.hash(), b2a.hash().min(b2b.hash()));
}

#[test]
fn test_switch_only_when_higher() {
    let (genesis, store, fork) = setup();
    let b1 = child(&genesis, 0);
    let b2a = child(&b1, 1);
    let b2b = child(&b1, 2);
    for block in [&b1, &b2a, &b2b] {
        insert(&store, block);
    }

    let head = if b2a.hash() > b2b.hash() { b2a } else { b2b };
    fork.set_head(Arc::new(head.clone()));
    // equal height never switches, even to the preferred hash
    assert!(fork.try_switch_fork(&genesis).unwrap().is_none());
    assert_eq!(fork.head_block().hash(), head.hash());
}

#[test]
fn test_switch_at_quorum_distance() {
    let (genesis, store, fork) = setup();
    let b1 = child(&genesis, 0);
    let b2 = child(&b1, 0);
    let side1 = child(&genesis, 9);
    insert(&store, &b1);
    insert(&store, &side1);
    fork.set_head(Arc::new(side1));

    // quorum of three deputies is two
    insert(&store, &b2);
    let switched = fork.try_switch_fork(&genesis).unwrap().unwrap();
    assert_eq!(switched.hash(), b2.hash());
    assert_eq!(fork.head_block().hash(), b2.hash());
}

#[test]
fn test_no_switch_off_quorum_distance() {
    let (genesis, store, fork) = setup();
    let b1 = child(&genesis, 0);
    let b2 = child(&b1, 0);
    let b3 = child(&b2, 0);
    let side1 = child(&genesis, 9);
    let side2 = child(&side1, 9);
    for block in [&b1, &b2, &b3, &side1, &side2] {
        insert(&store, block);
    }
    fork.set_head(Arc::new(side2.clone()));

    // b3 is three blocks above stable, not a multiple of two
    assert!(fork.try_switch_fork(&genesis).unwrap().is_none());
    assert_eq!(fork.head_block().hash(), side2.hash());

    let b4 = child(&b3, 0);
    insert(&store, &b4);
    assert_eq!(fork.try_switch_fork(&genesis).unwrap().unwrap().hash(), b4.hash());
}

#[test]
fn test_choice_ignores_stable_blocks() {
    let (genesis, store, fork) = setup();
    let b1 = child(&genesis, 0);
    let b2 = child(&b1, 0);
    insert(&store, &b1);
    insert(&store, &b2);
    store.set_stable_block(&b2.hash()).unwrap();

    assert!(fork.choose_new_fork().is_none());
    assert!(fork.try_switch_fork(&b2).unwrap().is_none());
    assert_eq!(fork.head_block().hash(), genesis.hash());
}
