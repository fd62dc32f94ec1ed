use std::sync::atomic::Ordering;

use arbor_nodes::KeyFactory;
use proptest::prelude::*;

use crate::common::{ListFactory, Tree, forest, shared_forest};

fn expected_names(keys: &[u32]) -> Vec<String> {
	let mut seen = Vec::new();
	for &key in keys {
		if !seen.contains(&key) {
			seen.push(key);
		}
	}
	seen.into_iter().filter(|key| key % 5 != 0 && *key != 13).map(|key| format!("N{key}")).collect()
}

/// Distinct keys that each yield exactly one node, with a shuffled copy.
fn shuffled_keys() -> impl Strategy<Value = (Vec<u32>, Vec<u32>)> {
	proptest::collection::hash_set(0u32..200, 1..24)
		.prop_map(|set| set.into_iter().map(|key| key * 5 + 1).collect::<Vec<_>>())
		.prop_flat_map(|keys| (Just(keys.clone()), Just(keys).prop_shuffle()))
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(48))]

	#[test]
	fn prop_nodes_follow_key_order(keys in proptest::collection::vec(1u32..60, 0..30)) {
		let tree = Tree::new(&shared_forest(), ListFactory::new(&keys), false);
		prop_assert_eq!(tree.children().nodes(false).names(), expected_names(&keys));
	}

	#[test]
	fn prop_permutation_is_one_reorder((before, after) in shuffled_keys()) {
		let factory = ListFactory::new(&before);
		let tree = Tree::new(&shared_forest(), factory.clone(), false);
		let old = tree.children().nodes(false);
		tree.take_events();

		factory.set(&after);
		factory.refresh(false);

		let events = tree.take_events();
		if before == after {
			prop_assert!(events.is_empty(), "unexpected {:?}", events);
		} else {
			prop_assert_eq!(events.len(), 1);
			prop_assert!(events[0].starts_with("reordered"), "unexpected {:?}", events);
		}
		let new = tree.children().nodes(false);
		prop_assert_eq!(new.names(), expected_names(&after));
		for node in old.iter() {
			prop_assert!(new.contains(node));
		}
		prop_assert!(factory.destroyed.lock().is_empty());
	}
}

#[test]
fn deactivation_notifies_the_factory_once() {
	let forest = forest();
	for asynchronous in [false, true] {
		let factory = ListFactory::new(&[1, 2]);
		let tree = Tree::new(&forest, factory.clone(), asynchronous);
		tree.children().nodes(true);

		tree.children().deactivate();
		tree.children().deactivate();

		assert_eq!(factory.added.load(Ordering::SeqCst), 1);
		assert_eq!(factory.removed.load(Ordering::SeqCst), 1);
		assert!(tree.visible().is_empty());
		assert!(!tree.children().is_active());
	}
}

#[test]
fn deactivating_unused_children_does_not_notify() {
	let forest = forest();
	for asynchronous in [false, true] {
		let factory = ListFactory::new(&[1]);
		let tree = Tree::new(&forest, factory.clone(), asynchronous);
		tree.children().deactivate();
		assert_eq!(factory.added.load(Ordering::SeqCst), 0);
		assert_eq!(factory.removed.load(Ordering::SeqCst), 0);
	}
}

#[test]
fn every_activation_is_paired_with_one_deactivation() {
	let forest = forest();
	let factory = ListFactory::new(&[1, 2, 3]);
	let tree = Tree::new(&forest, factory.clone(), true);
	for round in 1..=3 {
		assert_eq!(tree.children().nodes(true).names(), vec!["N1", "N2", "N3"]);
		tree.children().deactivate();
		assert_eq!(factory.added.load(Ordering::SeqCst), round);
		assert_eq!(factory.removed.load(Ordering::SeqCst), round);
	}
}
