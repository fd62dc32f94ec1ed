use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arbor_nodes::{Children, Forest, KeyFactory, Node, NodeEvent, NodesConfig, NodesError};
use pretty_assertions::assert_eq;

use crate::common::{ListFactory, Tree, forest, init_tracing};

#[test]
fn a_factory_feeds_one_children_at_a_time() {
	let forest = forest();
	let factory = ListFactory::new(&[1]);
	let first = Children::create(&forest, factory.clone(), false).unwrap();
	assert!(matches!(
		Children::create(&forest, factory.clone(), true),
		Err(NodesError::FactoryAlreadyAttached)
	));
	drop(first);
	assert!(Children::create(&forest, factory, true).is_ok());
}

#[test]
fn failing_and_empty_keys_are_hidden() {
	let forest = forest();
	for asynchronous in [false, true] {
		let factory = ListFactory::new(&[12, 13, 15, 14]);
		let tree = Tree::new(&forest, factory.clone(), asynchronous);
		assert_eq!(tree.children().nodes(true).names(), vec!["N12", "N14"]);
		assert_eq!(factory.created.load(Ordering::SeqCst), 4);
	}
}

#[test]
fn children_know_their_parent() {
	let forest = forest();
	let tree = Tree::new(&forest, ListFactory::new(&[1, 2]), false);
	for node in tree.children().nodes(false).iter() {
		assert_eq!(node.parent(), Some(tree.root.clone()));
	}
	assert!(!tree.root.is_leaf());
	assert!(Node::leaf("x").is_leaf());
}

#[test]
fn lookups_activate_the_children() {
	let forest = forest();
	let tree = Tree::new(&forest, ListFactory::new(&[1, 2, 3]), true);
	assert!(!tree.children().is_active());
	assert_eq!(tree.children().find_child(Some("N2")).map(|node| node.name().to_string()), Some("N2".to_string()));
	assert!(tree.children().is_active());
	assert_eq!(tree.children().find_child(None).map(|node| node.name().to_string()), Some("N1".to_string()));
	assert!(tree.children().find_child(Some("N9")).is_none());
	assert_eq!(tree.children().node_at(2).map(|node| node.name().to_string()), Some("N3".to_string()));
	assert!(tree.children().node_at(3).is_none());
}

#[test]
fn removed_nodes_are_destroyed() {
	let forest = forest();
	let factory = ListFactory::new(&[1, 2]);
	let tree = Tree::new(&forest, factory.clone(), false);
	let gone = tree.children().nodes(false)[1].clone();
	let destroyed = Arc::new(AtomicBool::new(false));
	let flag = destroyed.clone();
	gone.add_listener(move |event: &NodeEvent| {
		if matches!(event, NodeEvent::NodeDestroyed { .. }) {
			flag.store(true, Ordering::SeqCst);
		}
	});
	tree.take_events();

	factory.set(&[1]);
	factory.refresh(false);

	assert_eq!(tree.take_events(), vec!["removed [1]"]);
	assert!(destroyed.load(Ordering::SeqCst));
	assert_eq!(*factory.destroyed.lock(), vec!["N2"]);
	assert_eq!(gone.parent(), None);
}

#[test]
fn placeholder_is_shown_until_keys_arrive() {
	let forest = forest();
	let factory = ListFactory::with_wait(&[1]);
	let tree = Tree::new(&forest, factory.clone(), true);
	assert_eq!(tree.children().nodes(true).names(), vec!["N1"]);
	let events = tree.take_events();
	assert_eq!(events.first().map(String::as_str), Some("added [0]"));
	assert!(factory.destroyed.lock().is_empty());
}

#[test]
fn released_children_come_back_without_events() {
	let forest = forest();
	let factory = ListFactory::new(&[1, 2, 3]);
	let tree = Tree::new(&forest, factory.clone(), false);
	let nodes = tree.children().nodes(false);
	let kept = nodes[1].clone();
	drop(nodes);
	tree.take_events();

	tree.children().release();
	assert!(tree.children().snapshot().is_empty());
	assert_eq!(tree.children().sweep(), 2);
	assert!(tree.children().is_active());

	let again = tree.children().nodes(false);
	assert_eq!(again.names(), vec!["N1", "N2", "N3"]);
	assert_eq!(again[1], kept);
	assert!(tree.take_events().is_empty());
	assert_eq!(factory.created.load(Ordering::SeqCst), 5);
	drop(again);
	drop(kept);

	tree.children().release();
	assert_eq!(tree.children().sweep(), 3);
	assert!(!tree.children().is_active());
	assert_eq!(factory.removed.load(Ordering::SeqCst), 1);

	assert_eq!(tree.children().nodes(false).names(), vec!["N1", "N2", "N3"]);
	assert_eq!(factory.added.load(Ordering::SeqCst), 2);
}

#[test]
fn lazy_children_are_built_on_first_use() {
	let forest = forest();
	let factory = ListFactory::new(&[1, 2]);
	let built = Arc::new(AtomicBool::new(false));
	let (flag, source, f) = (built.clone(), factory.clone(), forest.clone());
	let root = Node::new(
		"root",
		Children::lazy(move || {
			flag.store(true, Ordering::SeqCst);
			Children::create(&f, source, false).unwrap()
		}),
	);

	assert!(!root.is_leaf());
	assert!(root.children().snapshot().is_empty());
	assert!(!root.children().is_initialized());
	root.children().release();
	assert!(!built.load(Ordering::SeqCst));

	let nodes = root.children().nodes(false);
	assert!(built.load(Ordering::SeqCst));
	assert_eq!(nodes.names(), vec!["N1", "N2"]);
	assert_eq!(nodes[0].parent(), Some(root.clone()));
}

#[test]
fn lazy_leaf_becomes_a_leaf() {
	let root = Node::new("root", Children::lazy(Children::leaf));
	assert!(!root.is_leaf());
	assert!(root.children().nodes(true).is_empty());
	assert!(root.is_leaf());
	assert!(root.children().is_initialized());
}

#[test]
fn nested_positions_populate_independently() {
	let forest = forest();
	let inner = ListFactory::new(&[7, 8]);
	let branch = Node::new("branch", Children::create(&forest, inner.clone(), true).unwrap());
	let outer = Tree::new(&forest, ListFactory::new(&[1]), false);

	assert_eq!(outer.children().nodes(true).names(), vec!["N1"]);
	assert!(!branch.children().is_active());
	assert_eq!(branch.children().nodes(true).names(), vec!["N7", "N8"]);
	branch.children().deactivate();
	assert!(outer.children().is_active());
	assert_eq!(inner.removed.load(Ordering::SeqCst), 1);
}

#[test]
fn forest_reads_config_files() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("nodes.toml");
	std::fs::write(&path, "worker_threads = 1\noptimal_wait_timeout_ms = 250\nwait_label = \"Loading\"\n").unwrap();

	let config = NodesConfig::load(&path).unwrap();
	assert_eq!(config.worker_threads, 1);
	let forest = Forest::new(config).unwrap();
	assert_eq!(forest.placeholder().name(), "Loading");

	let tree = Tree::new(&forest, ListFactory::new(&[1, 2]), true);
	assert_eq!(tree.children().nodes(true).names(), vec!["N1", "N2"]);
}
