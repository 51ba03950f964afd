//! Term registry tests

use super::helpers::{registry_with, test_config};
use crate::{
    test_utils::{deputy_address, deputy_nodes, deputy_signer},
    DpovpConfig, DpovpError, TermRegistry,
};
use assert_matches::assert_matches;
use dpovp_primitives::DeputyNodes;

fn nodes(count: u8) -> DeputyNodes {
    let signers: Vec<_> = (0..count).map(deputy_signer).collect();
    deputy_nodes(&signers)
}

fn small_registry() -> TermRegistry {
    TermRegistry::new(DpovpConfig::new().with_term(100, 10).with_reward_check_height(50))
}

#[test]
fn test_terms_saved_in_sequence() {
    let registry = small_registry();
    registry.save_snapshot(0, nodes(3));
    registry.save_snapshot(100, nodes(4));
    registry.save_snapshot(200, nodes(5));
    assert_eq!(registry.term_count(), 3);

    // the genesis deputies also run the first interim of term 1
    assert_eq!(registry.get_deputies_count(110).unwrap(), 3);
    assert_eq!(registry.get_deputies_count(111).unwrap(), 4);
    assert_eq!(registry.get_deputies_count(211).unwrap(), 5);
    assert_eq!(registry.get_term_by_height(150).unwrap().term_index, 1);
    assert_matches!(registry.get_term_by_height(311), Err(DpovpError::TermNotFound(3)));
}

#[test]
fn test_resave_identical_drops_later_terms() {
    let registry = small_registry();
    registry.save_snapshot(0, nodes(3));
    registry.save_snapshot(100, nodes(4));
    registry.save_snapshot(200, nodes(5));

    registry.save_snapshot(100, nodes(4));
    assert_eq!(registry.term_count(), 2);
    assert_eq!(registry.get_term_by_index(1).unwrap().nodes, nodes(4));
    assert!(registry.get_term_by_index(2).is_none());
}

#[test]
fn test_resave_different_drops_later_terms() {
    let registry = small_registry();
    registry.save_snapshot(0, nodes(3));
    registry.save_snapshot(100, nodes(4));
    registry.save_snapshot(200, nodes(5));

    registry.save_snapshot(100, nodes(2));
    assert_eq!(registry.term_count(), 2);
    assert_eq!(registry.get_term_by_index(1).unwrap().deputy_count(), 2);
    assert!(registry.get_term_by_index(2).is_none());
}

#[test]
#[should_panic(expected = "term 2 saved while only 1 terms are known")]
fn test_skipping_a_term_panics() {
    let registry = small_registry();
    registry.save_snapshot(0, nodes(3));
    registry.save_snapshot(200, nodes(3));
}

#[test]
#[should_panic(expected = "not a snapshot height")]
fn test_non_snapshot_height_panics() {
    small_registry().save_snapshot(50, nodes(3));
}

#[test]
#[should_panic(expected = "empty deputy list")]
fn test_empty_deputies_panic() {
    small_registry().save_snapshot(0, Vec::new());
}

#[test]
#[should_panic(expected = "4 deputies at snapshot height 100 exceed the maximum of 3")]
fn test_too_many_deputies_panic() {
    let config = DpovpConfig::new().with_term(100, 10).with_reward_check_height(50).with_max_deputy_count(3);
    let registry = TermRegistry::new(config);
    registry.save_snapshot(0, nodes(3));
    registry.save_snapshot(100, nodes(4));
}

#[test]
#[should_panic(expected = "deputy rank")]
fn test_unordered_ranks_panic() {
    let mut list = nodes(3);
    list.swap(0, 2);
    small_registry().save_snapshot(0, list);
}

#[test]
fn test_deputy_lookups() {
    let registry = registry_with(test_config(), 3);
    let c = deputy_signer(2);

    let by_address = registry.get_deputy_by_address(5, &deputy_address(2)).unwrap();
    assert_eq!(by_address.rank, 2);
    assert_eq!(by_address.node_id, c.node_id());
    assert_eq!(registry.get_deputy_by_node_id(5, &c.node_id()).unwrap(), by_address);

    assert!(registry.is_self_deputy(5, &c.node_id()));
    assert!(!registry.is_self_deputy(5, &deputy_signer(7).node_id()));
    assert!(registry.get_deputy_by_address(5, &deputy_address(7)).is_none());
    // unknown term
    assert!(registry.get_deputy_by_address(5_000, &deputy_address(2)).is_none());

    assert_eq!(registry.two_third_deputy_count(5).unwrap(), 2);
}

#[test]
fn test_evil_mark_expires() {
    let registry = registry_with(test_config(), 3);
    let a = deputy_address(0);

    registry.set_evil(a, 20);
    assert!(registry.is_evil(&a, 10));
    assert!(registry.is_evil(&a, 19));
    assert!(!registry.is_evil(&a, 20));
    // cleared, an earlier height no longer sees it
    assert!(!registry.is_evil(&a, 10));
    assert!(!registry.is_evil(&deputy_address(1), 10));
}
