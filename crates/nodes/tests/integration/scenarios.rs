//! End-to-end population scenarios over synchronous and background factories.

use std::sync::atomic::Ordering;
use std::time::Duration;

use arbor_nodes::{Cancelled, KeyFactory, NodeEvent, PopulatorPhase};
use pretty_assertions::assert_eq;

use crate::common::{ListFactory, SteppedFactory, Tree, forest};

#[test]
fn optimal_nodes_follow_key_order() {
	let forest = forest();
	for asynchronous in [false, true] {
		let tree = Tree::new(&forest, ListFactory::new(&[1, 2, 3]), asynchronous);
		assert_eq!(tree.children().nodes(true).names(), vec!["N1", "N2", "N3"]);
		assert!(tree.children().is_initialized());
	}
}

#[test]
fn background_population_completes() {
	let forest = forest();
	let tree = Tree::new(&forest, ListFactory::new(&[1, 2, 3]), true);
	tree.children().nodes(true);
	assert_eq!(tree.children().phase(), Some(PopulatorPhase::Completed));
	assert_eq!(tree.children().node_count(false), 3);
}

#[test]
fn rotated_keys_emit_one_reorder() {
	let forest = forest();
	for asynchronous in [false, true] {
		let factory = ListFactory::new(&[1, 2, 3]);
		let tree = Tree::new(&forest, factory.clone(), asynchronous);
		let before = tree.children().nodes(true);
		tree.take_events();

		factory.set(&[3, 1, 2]);
		factory.refresh(true);

		assert_eq!(tree.take_events(), vec!["reordered [1, 2, 0]"]);
		let after = tree.children().nodes(true);
		assert_eq!(after.names(), vec!["N3", "N1", "N2"]);
		assert_eq!(after[1], before[0]);
		assert!(factory.destroyed.lock().is_empty());
	}
}

#[test]
fn progressive_reveal_shows_keys_as_they_arrive() {
	let forest = forest();
	let factory = SteppedFactory::new(&[1, 2, 3]);
	let tree = Tree::new(&forest, factory.clone(), true);
	let root = tree.root.downgrade();
	let _ = factory.observe.set(Box::new(move || root.upgrade().map(|node| node.children().snapshot().names()).unwrap_or_default()));

	let nodes = tree.children().nodes(true);

	assert_eq!(nodes.names(), vec!["N1", "N2", "N3"]);
	assert!(!nodes.iter().any(|node| node.is_placeholder()));
	assert_eq!(
		*factory.seen.lock(),
		vec![vec!["N1", "Please wait..."], vec!["N1", "N2", "Please wait..."]]
	);
	assert_eq!(factory.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn revealed_lists_only_grow() {
	let forest = forest();
	let factory = SteppedFactory::new(&[1, 2, 3, 4, 5]);
	let tree = Tree::new(&forest, factory, true);
	tree.children().nodes(true);

	let visible: Vec<Vec<String>> = tree
		.take_raw()
		.iter()
		.filter_map(|event| match event {
			NodeEvent::ChildrenAdded { snapshot_after, .. } | NodeEvent::ChildrenRemoved { snapshot_after, .. } => Some(snapshot_after),
			_ => None,
		})
		.map(|snapshot| snapshot.iter().filter(|node| !node.is_placeholder()).map(|node| node.name().to_string()).collect())
		.collect();

	assert!(!visible.is_empty());
	for pair in visible.windows(2) {
		assert!(pair[1].starts_with(&pair[0]), "{:?} does not extend {:?}", pair[1], pair[0]);
	}
	assert_eq!(visible.last().unwrap(), &vec!["N1", "N2", "N3", "N4", "N5"]);
}

#[test]
fn cancellation_mid_enumeration_clears_children() {
	let forest = forest();
	let (factory, gate) = SteppedFactory::gated(&[1, 2, 3]);
	let tree = Tree::new(&forest, factory.clone(), true);

	tree.children().nodes(false);
	gate.reached.recv_timeout(Duration::from_secs(5)).unwrap();
	assert_eq!(tree.visible(), vec!["N1", "Please wait..."]);

	tree.children().deactivate();
	assert!(tree.visible().is_empty());
	gate.open.send(()).unwrap();
	assert_eq!(gate.outcome.recv_timeout(Duration::from_secs(5)).unwrap(), Err(Cancelled));

	assert!(tree.visible().is_empty());
	assert!(!tree.children().is_initialized());
	assert!(!tree.children().is_active());
	assert_eq!(tree.children().phase(), Some(PopulatorPhase::Cancelled));
	assert_eq!(factory.removed.load(Ordering::SeqCst), 1);

	let nodes = tree.children().nodes(true);
	assert_eq!(nodes.names(), vec!["N1", "N2", "N3"]);
	assert!(tree.children().is_initialized());
	assert_eq!(factory.added.load(Ordering::SeqCst), 2);
}
