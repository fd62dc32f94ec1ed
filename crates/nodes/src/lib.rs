//! Key-driven child population for trees of nodes.
//!
//! A [`KeyFactory`] produces an ordered list of keys for one tree position
//! and the nodes shown for each key. [`Children::create`] wires a factory to
//! a populator that runs it either on the calling thread or on the
//! [`Forest`]'s worker pool. Every committed key list is diffed against the
//! previous one and observers of the owning [`Node`] receive the minimal
//! removed/reordered/added [`NodeEvent`]s. [`KeyedChildren`] and
//! [`ChildArray`] take their keys from the caller instead of a factory.
//!
//! All structural mutation is serialized by the forest's [`TreeLock`].

mod children;
mod config;
mod entries;
mod error;
mod event;
mod factory;
mod forest;
mod keys;
mod lock;
mod node;
mod populator;
mod snapshot;

pub use children::Children;
pub use config::NodesConfig;
pub use error::{Cancelled, ConfigError, ConsistencyFault, NodesError, Result};
pub use event::{ListenerId, NodeEvent, NodeListener};
pub use factory::{FactoryLink, KeyFactory, KeySink, KeysProgress};
pub use forest::Forest;
pub use keys::{ChildArray, KeyedChildren};
pub use lock::TreeLock;
pub use node::{Node, NodeId, NodeKind, WeakNode};
pub use populator::PopulatorPhase;
pub use snapshot::Snapshot;
