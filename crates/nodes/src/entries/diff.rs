//! Index arithmetic for turning one entry list into another.
//!
//! Entries span `length` consecutive nodes; every index produced here is a
//! node index, so entries that realized nothing contribute nothing.

use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

/// Node indices, in the previous layout, of entries missing from `keep`.
///
/// Returns the positions (into `old`) of dropped entries and the node
/// indices they covered.
pub(crate) fn removal<K: Eq + Hash>(old: &[(K, usize)], keep: &FxHashSet<&K>) -> (Vec<usize>, Vec<usize>) {
	let mut dropped = Vec::new();
	let mut indices = Vec::new();
	let mut offset = 0;
	for (pos, (key, length)) in old.iter().enumerate() {
		if !keep.contains(key) {
			dropped.push(pos);
			indices.extend(offset..offset + length);
		}
		offset += length;
	}
	(dropped, indices)
}

/// Node permutation taking survivors from their old order to `new_order`.
///
/// `survivors` lists the surviving entries in their previous order with their
/// lengths; `new_order` lists the same keys in the order they must take.
/// Returns `None` when no node moves.
pub(crate) fn permutation<K: Eq + Hash>(survivors: &[(K, usize)], new_order: &[&K]) -> Option<Vec<usize>> {
	let lengths: FxHashMap<&K, usize> = survivors.iter().map(|(k, l)| (k, *l)).collect();
	let mut starts: FxHashMap<&K, usize> = FxHashMap::default();
	let mut offset = 0;
	for key in new_order {
		starts.insert(*key, offset);
		offset += lengths.get(*key).copied().unwrap_or(0);
	}

	let mut perm = Vec::with_capacity(offset);
	for (key, length) in survivors {
		let start = starts.get(key).copied().unwrap_or(perm.len());
		perm.extend(start..start + length);
	}

	if perm.iter().enumerate().all(|(i, p)| i == *p) { None } else { Some(perm) }
}

/// Node indices, in the final layout, covered by flagged entries.
pub(crate) fn insertion_indices(layout: &[(usize, bool)]) -> Vec<usize> {
	let mut indices = Vec::new();
	let mut offset = 0;
	for (length, added) in layout {
		if *added {
			indices.extend(offset..offset + length);
		}
		offset += length;
	}
	indices
}

/// Applies `perm` to `items`: the item at `i` moves to `perm[i]`.
pub(crate) fn apply_permutation<T: Clone>(items: &[T], perm: &[usize]) -> Option<Vec<T>> {
	if items.len() != perm.len() {
		return None;
	}
	let mut out: Vec<Option<T>> = vec![None; items.len()];
	for (item, target) in items.iter().zip(perm) {
		let slot = out.get_mut(*target)?;
		if slot.is_some() {
			return None;
		}
		*slot = Some(item.clone());
	}
	out.into_iter().collect()
}
