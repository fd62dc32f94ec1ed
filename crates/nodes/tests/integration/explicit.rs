use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor_nodes::{ChildArray, Forest, KeyedChildren, Node, NodeEvent};
use pretty_assertions::assert_eq;

use crate::common::{Tree, forest};

fn letters(forest: &Forest) -> (KeyedChildren<char>, Arc<AtomicUsize>) {
	let created = Arc::new(AtomicUsize::new(0));
	let counter = created.clone();
	let keyed = KeyedChildren::new(forest, move |key: &char| {
		counter.fetch_add(1, Ordering::SeqCst);
		vec![Node::leaf(key.to_string())]
	});
	(keyed, created)
}

#[test]
fn set_keys_again_reorders_in_one_event() {
	let forest = forest();
	let (keyed, created) = letters(&forest);
	keyed.set_keys(['1', '2', '3']);
	let tree = Tree::over(keyed.children());
	let before = tree.children().nodes(false);
	tree.take_events();

	keyed.set_keys(['3', '1', '2']);

	assert_eq!(tree.take_events(), vec!["reordered [1, 2, 0]"]);
	let after = tree.children().nodes(false);
	assert_eq!(after.names(), vec!["3", "1", "2"]);
	assert_eq!(after[0], before[2]);
	assert_eq!(created.load(Ordering::SeqCst), 3);
	assert!(tree.children().is_initialized());
}

#[test]
fn keys_set_before_use_are_stored_quietly() {
	let forest = forest();
	let (keyed, created) = letters(&forest);
	let tree = Tree::over(keyed.children());
	keyed.set_keys(['a', 'b']);
	keyed.set_keys(['b', 'c', 'b']);

	assert!(tree.take_events().is_empty());
	assert_eq!(created.load(Ordering::SeqCst), 0);
	assert!(!tree.children().is_active());
	assert_eq!(keyed.keys(), vec!['b', 'c', 'b']);

	assert_eq!(tree.children().nodes(false).names(), vec!["b", "c"]);
	assert_eq!(tree.take_events(), vec!["added [0, 1]"]);
}

#[test]
fn reactivation_restores_the_keys() {
	let forest = forest();
	let (keyed, _) = letters(&forest);
	keyed.set_keys(['x', 'y']);
	let tree = Tree::over(keyed.children());
	tree.children().nodes(false);
	tree.take_events();

	tree.children().deactivate();
	assert_eq!(tree.take_events(), vec!["removed [0, 1]"]);
	assert!(tree.visible().is_empty());
	assert_eq!(keyed.keys(), vec!['x', 'y']);

	assert_eq!(tree.children().nodes(false).names(), vec!["x", "y"]);
	assert_eq!(tree.take_events(), vec!["added [0, 1]"]);
}

#[test]
fn refresh_key_recreates_one_explicit_entry() {
	let forest = forest();
	let (keyed, created) = letters(&forest);
	keyed.set_keys(['p', 'q']);
	let tree = Tree::over(keyed.children());
	let before = tree.children().nodes(false);
	tree.take_events();

	keyed.clone().refresh_key(&'q');

	assert_eq!(tree.take_events(), vec!["removed [1]", "added [1]"]);
	let after = tree.children().nodes(false);
	assert_eq!(after[0], before[0]);
	assert_ne!(after[1], before[1]);
	assert_eq!(created.load(Ordering::SeqCst), 3);
}

#[test]
fn array_reports_additions_and_removals() {
	let forest = forest();
	let array = ChildArray::new(&forest);
	let tree = Tree::over(array.children());
	let (a, b, c) = (Node::leaf("a"), Node::leaf("b"), Node::leaf("c"));
	array.add([a.clone(), b.clone()]);
	assert_eq!(tree.children().nodes(false).names(), vec!["a", "b"]);
	assert_eq!(a.parent(), Some(tree.root.clone()));
	tree.take_events();

	array.add([c.clone(), a.clone()]);
	assert_eq!(tree.take_events(), vec!["added [2]"]);
	assert_eq!(array.nodes(), vec![a.clone(), b.clone(), c.clone()]);

	let destroyed = Arc::new(AtomicUsize::new(0));
	let counter = destroyed.clone();
	b.add_listener(move |event: &NodeEvent| {
		if matches!(event, NodeEvent::NodeDestroyed { .. }) {
			counter.fetch_add(1, Ordering::SeqCst);
		}
	});
	assert!(array.remove(&[b.clone()]));
	assert_eq!(tree.take_events(), vec!["removed [1]"]);
	assert_eq!(tree.visible(), vec!["a", "c"]);
	assert_eq!(b.parent(), None);
	assert_eq!(destroyed.load(Ordering::SeqCst), 1);

	assert!(!array.remove(&[b]));
	assert!(tree.take_events().is_empty());
}

#[test]
fn array_skips_nodes_owned_elsewhere() {
	let forest = forest();
	let other = ChildArray::new(&forest);
	let owner = Node::new("other", other.children());
	let shared = Node::leaf("shared");
	other.add([shared.clone()]);
	owner.children().nodes(false);

	let array = ChildArray::new(&forest);
	let tree = Tree::over(array.children());
	array.add([shared.clone(), Node::leaf("own")]);
	assert_eq!(tree.children().nodes(false).names(), vec!["own"]);
	assert_eq!(shared.parent(), Some(owner));
}
