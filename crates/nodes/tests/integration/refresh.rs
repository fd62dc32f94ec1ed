use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use arbor_nodes::{Forest, KeyFactory, NodeEvent, NodesConfig, PopulatorPhase};
use pretty_assertions::assert_eq;

use crate::common::{ListFactory, SteppedFactory, Tree, eventually, forest, init_tracing};

#[test]
fn refresh_key_recreates_one_entry() {
	let forest = forest();
	for asynchronous in [false, true] {
		let factory = ListFactory::new(&[1, 2, 3]);
		let tree = Tree::new(&forest, factory.clone(), asynchronous);
		let before = tree.children().nodes(true);
		tree.take_events();

		factory.link().refresh_key(&2);

		assert_eq!(tree.take_events(), vec!["removed [1]", "added [1]"]);
		let after = tree.children().nodes(true);
		assert_eq!(after.names(), vec!["N1", "N2", "N3"]);
		assert_eq!(after[0], before[0]);
		assert_ne!(after[1], before[1]);
		assert_eq!(*factory.destroyed.lock(), vec!["N2"]);
	}
}

#[test]
fn immediate_refresh_runs_on_the_caller() {
	let forest = forest();
	let factory = ListFactory::new(&[1]);
	let tree = Tree::new(&forest, factory.clone(), true);
	tree.children().nodes(true);
	let worker = factory.threads.lock()[0];
	assert_ne!(worker, std::thread::current().id());

	factory.set(&[4, 1]);
	factory.refresh(true);

	assert_eq!(tree.visible(), vec!["N4", "N1"]);
	assert_eq!(factory.threads.lock().last(), Some(&std::thread::current().id()));
}

#[test]
fn immediate_refresh_on_the_dispatch_thread_is_scheduled() {
	let forest = forest();
	forest.bind_dispatch_thread();
	let factory = ListFactory::new(&[1]);
	let tree = Tree::new(&forest, factory.clone(), true);
	tree.children().nodes(true);

	factory.set(&[6]);
	factory.refresh(true);

	assert_eq!(tree.children().nodes(true).names(), vec!["N6"]);
	let threads = factory.threads.lock();
	assert_eq!(threads.len(), 2);
	assert!(threads.iter().all(|thread| *thread != std::thread::current().id()));
}

#[test]
fn queued_refresh_recomputes_in_the_background() {
	let forest = forest();
	let factory = ListFactory::new(&[1, 2]);
	let tree = Tree::new(&forest, factory.clone(), true);
	tree.children().nodes(true);
	tree.take_events();

	factory.set(&[2, 3]);
	factory.refresh(false);

	assert!(eventually(|| tree.visible() == vec!["N2", "N3"]));
	assert_eq!(tree.children().phase(), Some(PopulatorPhase::Completed));
	assert_eq!(tree.take_events(), vec!["removed [0]", "added [1]"]);
}

#[test]
fn refreshing_unused_children_does_nothing() {
	let forest = forest();
	for asynchronous in [false, true] {
		let factory = ListFactory::new(&[1]);
		let tree = Tree::new(&forest, factory.clone(), asynchronous);
		factory.refresh(true);
		factory.refresh(false);
		assert!(factory.threads.lock().is_empty());
		assert!(!tree.children().is_active());
	}
}

#[test]
fn refresh_after_the_children_are_gone_is_ignored() {
	let forest = forest();
	let factory = ListFactory::new(&[1]);
	let tree = Tree::new(&forest, factory.clone(), true);
	tree.children().nodes(true);
	drop(tree);

	assert!(!factory.link().is_attached());
	factory.refresh(true);
	assert_eq!(factory.threads.lock().len(), 1);
}

#[test]
fn optimal_wait_gives_up_after_the_timeout() {
	init_tracing();
	let config = NodesConfig {
		optimal_wait_timeout_ms: Some(50),
		..NodesConfig::default()
	};
	let forest = Forest::new(config).unwrap();
	let (factory, gate) = SteppedFactory::gated(&[1, 2]);
	let tree = Tree::new(&forest, factory, true);

	let started = Instant::now();
	let nodes = tree.children().nodes(true);
	assert!(started.elapsed() < Duration::from_secs(5));
	assert!(nodes.iter().any(|node| node.is_placeholder()));
	assert!(!tree.children().is_initialized());

	gate.reached.recv_timeout(Duration::from_secs(5)).unwrap();
	gate.open.send(()).unwrap();
	assert!(eventually(|| tree.children().is_initialized()));
	assert_eq!(tree.visible(), vec!["N1", "N2"]);
}

#[test]
fn listeners_can_read_optimal_nodes_without_blocking() {
	let forest = forest();
	let factory = ListFactory::new(&[1, 2, 3]);
	let tree = Tree::new(&forest, factory, true);
	let matched = Arc::new(AtomicUsize::new(0));
	let (counter, root) = (matched.clone(), tree.root.downgrade());
	tree.root.add_listener(move |event: &NodeEvent| {
		if let (NodeEvent::ChildrenAdded { snapshot_after, .. }, Some(root)) = (event, root.upgrade())
			&& root.children().nodes(true) == *snapshot_after
		{
			counter.fetch_add(1, Ordering::SeqCst);
		}
	});

	assert_eq!(tree.children().nodes(true).names(), vec!["N1", "N2", "N3"]);
	assert!(matched.load(Ordering::SeqCst) > 0);
}

#[test]
fn reads_under_tree_access_defer_activation() {
	let forest = forest();
	let tree = Tree::new(&forest, ListFactory::new(&[1, 2]), false);
	let inside = forest.lock().read(|| tree.children().nodes(true));
	assert!(inside.is_empty());
	assert_eq!(tree.visible(), vec!["N1", "N2"]);
	assert!(tree.children().is_initialized());
}
