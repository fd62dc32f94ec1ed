//! Tree elements handed out by key factories.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::children::Children;
use crate::event::{ListenerId, NodeEvent, NodeListener};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
	fn next() -> Self {
		Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw identifier.
	pub const fn get(self) -> u64 {
		self.0
	}
}

/// Distinguishes factory-produced nodes from the "please wait" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Regular,
	Placeholder,
}

/// Handle to one tree element.
///
/// Cloning is cheap and preserves identity: two handles compare equal only
/// when they refer to the same element.
#[derive(Clone)]
pub struct Node {
	inner: Arc<NodeInner>,
}

struct NodeInner {
	id: NodeId,
	name: String,
	kind: NodeKind,
	children: Children,
	parent: Mutex<Weak<NodeInner>>,
	listeners: Mutex<Vec<(ListenerId, Arc<dyn NodeListener>)>>,
}

/// Non-owning node reference.
#[derive(Clone, Default)]
pub struct WeakNode {
	inner: Weak<NodeInner>,
}

impl WeakNode {
	/// Returns the node if something still holds it.
	pub fn upgrade(&self) -> Option<Node> {
		self.inner.upgrade().map(|inner| Node { inner })
	}

	/// Returns true if this reference points at `node`.
	pub fn is(&self, node: &Node) -> bool {
		std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&node.inner))
	}
}

impl fmt::Debug for WeakNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.upgrade() {
			Some(node) => write!(f, "WeakNode({node:?})"),
			None => f.write_str("WeakNode(<gone>)"),
		}
	}
}

impl Node {
	/// Creates a node owning `children`.
	pub fn new(name: impl Into<String>, children: Children) -> Self {
		Self::with_kind(name.into(), children, NodeKind::Regular)
	}

	/// Creates a node without children.
	pub fn leaf(name: impl Into<String>) -> Self {
		Self::new(name, Children::leaf())
	}

	/// Creates a placeholder shown while children are still being computed.
	pub fn placeholder(name: impl Into<String>) -> Self {
		Self::with_kind(name.into(), Children::leaf(), NodeKind::Placeholder)
	}

	fn with_kind(name: String, children: Children, kind: NodeKind) -> Self {
		let inner = Arc::new(NodeInner {
			id: NodeId::next(),
			name,
			kind,
			children,
			parent: Mutex::new(Weak::new()),
			listeners: Mutex::new(Vec::new()),
		});
		let node = Self { inner };
		node.inner.children.bind_owner(node.downgrade());
		node
	}

	pub fn id(&self) -> NodeId {
		self.inner.id
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn kind(&self) -> NodeKind {
		self.inner.kind
	}

	pub fn is_placeholder(&self) -> bool {
		self.inner.kind == NodeKind::Placeholder
	}

	pub fn children(&self) -> &Children {
		&self.inner.children
	}

	pub fn is_leaf(&self) -> bool {
		self.inner.children.is_leaf()
	}

	/// Returns the node this one is currently displayed under.
	pub fn parent(&self) -> Option<Node> {
		self.inner.parent.lock().upgrade().map(|inner| Node { inner })
	}

	pub fn downgrade(&self) -> WeakNode {
		WeakNode {
			inner: Arc::downgrade(&self.inner),
		}
	}

	/// Registers a listener for structural events on this node.
	pub fn add_listener(&self, listener: impl NodeListener + 'static) -> ListenerId {
		let id = ListenerId::new(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
		self.inner.listeners.lock().push((id, Arc::new(listener)));
		id
	}

	/// Unregisters a listener. Returns false if it was not registered.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		let mut listeners = self.inner.listeners.lock();
		let before = listeners.len();
		listeners.retain(|(lid, _)| *lid != id);
		listeners.len() != before
	}

	/// Fires [`NodeEvent::NodeDestroyed`] to this node's listeners.
	///
	/// Called by the default [`crate::KeyFactory::destroy_nodes`]; overrides
	/// should call it as well unless they deliberately suppress the event.
	pub fn notify_destroyed(&self) {
		self.fire(&NodeEvent::NodeDestroyed { node: self.clone() });
	}

	pub(crate) fn fire(&self, event: &NodeEvent) {
		let listeners: Vec<_> = self.inner.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
		for listener in listeners {
			listener.on_event(event);
		}
	}

	/// Makes `parent` this node's parent unless another live parent owns it.
	pub(crate) fn assign_parent(&self, parent: &WeakNode) -> bool {
		let mut slot = self.inner.parent.lock();
		if let Some(current) = slot.upgrade()
			&& !std::ptr::eq(Arc::as_ptr(&current), parent.inner.as_ptr())
		{
			return false;
		}
		*slot = parent.inner.clone();
		true
	}

	/// Clears the parent back-reference if it still points at `parent`.
	pub(crate) fn clear_parent(&self, parent: &WeakNode) {
		let mut slot = self.inner.parent.lock();
		if std::ptr::eq(slot.as_ptr(), parent.inner.as_ptr()) {
			*slot = Weak::new();
		}
	}
}

impl PartialEq for Node {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for Node {}

impl Hash for Node {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.inner.id.hash(state);
	}
}

impl fmt::Debug for Node {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Node")
			.field("id", &self.inner.id.0)
			.field("name", &self.inner.name)
			.field("kind", &self.inner.kind)
			.finish()
	}
}
