// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-order traversal over every populated id (spec §4.3). Expansion is
//! lazy: a subtree reachable only by hash is fetched from storage the
//! moment the walk reaches it, and dropped once the walk moves past it —
//! it is never written back into the tree's own cache, so iterating never
//! mutates the tree it was built from.

use crate::error::Result;
use crate::hash::Digest;
use crate::node::{ChildRef, LeafRef, Node, NodeBody};
use crate::params::TreeParams;
use crate::storage::KvStore;
use crate::tree::{load_leaf_value, load_path_child};

/// Either a node already owned by the tree (reachable for as long as the
/// tree itself lives) or one fetched fresh from storage for this walk and
/// owned only by the traversal stack.
enum NodeCow<'a> {
    Borrowed(&'a Node),
    Owned(Box<Node>),
}

impl<'a> NodeCow<'a> {
    fn as_node(&self) -> &Node {
        match self {
            NodeCow::Borrowed(n) => n,
            NodeCow::Owned(n) => n,
        }
    }
}

struct Frame<'a> {
    node: NodeCow<'a>,
    next_slot: usize,
}

enum SlotAction<'a> {
    Skip,
    Value(i64, Vec<u8>),
    DescendBorrowed(&'a Node),
    DescendOwned(Digest),
    LoadLeafValue(i64, Digest),
}

impl<'a> Frame<'a> {
    fn degree(&self) -> usize {
        self.node.as_node().degree()
    }

    /// Decides what slot `slot` holds, without mutating anything. Matches
    /// on `&self.node` (rather than going through `as_node`) so that a
    /// `Borrowed` frame's loaded children come back as genuinely
    /// `'a`-lived references, independent of this method's own borrow.
    fn slot_action(&self, slot: usize) -> SlotAction<'a> {
        match &self.node {
            NodeCow::Borrowed(node_ref) => {
                let node: &'a Node = *node_ref;
                match &node.body {
                    NodeBody::Leaf(children) => leaf_slot_action(node, children, slot),
                    NodeBody::Path(children) => match &children[slot] {
                        ChildRef::Empty => SlotAction::Skip,
                        ChildRef::Loaded(child) => {
                            let child_ref: &'a Node = child;
                            SlotAction::DescendBorrowed(child_ref)
                        }
                        ChildRef::Unloaded => SlotAction::DescendOwned(
                            node.entry.child_hashes[slot]
                                .clone()
                                .expect("unloaded path slot has a hash"),
                        ),
                    },
                }
            }
            NodeCow::Owned(node_box) => {
                let node: &Node = node_box;
                match &node.body {
                    NodeBody::Leaf(children) => leaf_slot_action(node, children, slot),
                    NodeBody::Path(children) => match &children[slot] {
                        ChildRef::Empty => SlotAction::Skip,
                        ChildRef::Loaded(_) => {
                            unreachable!("a freshly loaded node's children are never pre-loaded")
                        }
                        ChildRef::Unloaded => SlotAction::DescendOwned(
                            node.entry.child_hashes[slot]
                                .clone()
                                .expect("unloaded path slot has a hash"),
                        ),
                    },
                }
            }
        }
    }
}

fn leaf_slot_action<'a>(node: &Node, children: &[LeafRef], slot: usize) -> SlotAction<'a> {
    let id = node.entry.offset + slot as i64;
    match &children[slot] {
        LeafRef::Empty => SlotAction::Skip,
        LeafRef::Loaded(value) => SlotAction::Value(id, value.clone()),
        LeafRef::Unloaded => SlotAction::LoadLeafValue(
            id,
            node.entry.child_hashes[slot]
                .clone()
                .expect("unloaded leaf slot has a hash"),
        ),
    }
}

/// A lazily-expanding, skip-capable in-order walk over a tree's populated
/// ids.
pub struct MstIterator<'a, S: KvStore> {
    store: &'a S,
    params: &'a TreeParams,
    stack: Vec<Frame<'a>>,
    total_count: i64,
    cursor: i64,
}

impl<'a, S: KvStore> MstIterator<'a, S> {
    pub(crate) fn new(root: &'a Node, store: &'a S, params: &'a TreeParams) -> Self {
        MstIterator {
            store,
            params,
            stack: vec![Frame {
                node: NodeCow::Borrowed(root),
                next_slot: 0,
            }],
            total_count: root.total_count(),
            cursor: -1,
        }
    }

    /// Total number of populated ids under the tree this iterator was
    /// built from, independent of how far the walk has progressed.
    pub fn total_count(&self) -> i64 {
        self.total_count
    }

    /// Whether another populated id remains to be visited (spec §4.3:
    /// `cursor + 1 < total_count`).
    pub fn has_next(&self) -> bool {
        self.cursor + 1 < self.total_count
    }

    /// Returns the next populated `(id, value)` pair in ascending id order,
    /// or `None` once the walk is exhausted.
    pub fn next(&mut self) -> Result<Option<(i64, Vec<u8>)>> {
        loop {
            let frame = match self.stack.last() {
                None => return Ok(None),
                Some(frame) => frame,
            };
            let degree = frame.degree();
            if frame.next_slot >= degree {
                self.stack.pop();
                continue;
            }
            let slot = frame.next_slot;
            let action = frame.slot_action(slot);
            self.stack.last_mut().expect("checked above").next_slot += 1;

            match action {
                SlotAction::Skip => continue,
                SlotAction::Value(id, value) => {
                    self.cursor += 1;
                    return Ok(Some((id, value)));
                }
                SlotAction::DescendBorrowed(child) => {
                    self.stack.push(Frame {
                        node: NodeCow::Borrowed(child),
                        next_slot: 0,
                    });
                }
                SlotAction::DescendOwned(hash) => {
                    let loaded = load_path_child(&hash, self.store, self.params)?;
                    self.stack.push(Frame {
                        node: NodeCow::Owned(loaded),
                        next_slot: 0,
                    });
                }
                SlotAction::LoadLeafValue(id, hash) => {
                    let bytes = load_leaf_value(&hash, self.store, self.params)?;
                    self.cursor += 1;
                    return Ok(Some((id, bytes)));
                }
            }
        }
    }

    /// Advances past `n` populated entries without returning them (spec
    /// §4.3). Uses each frame's `child_counts` snapshot to jump over whole
    /// empty or fully-skipped subtrees in one step, descending only into
    /// the one slot (if any) that needs to absorb a partial skip — so
    /// skipping never materializes an entry it isn't asked to return, and
    /// never loads a subtree it skips past entirely. Returns the number
    /// actually skipped, which is less than `n` if the walk ran out first.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let mut remaining = n;
        while remaining > 0 {
            let frame = match self.stack.last() {
                None => break,
                Some(frame) => frame,
            };
            let degree = frame.degree();
            if frame.next_slot >= degree {
                self.stack.pop();
                continue;
            }
            let slot = frame.next_slot;
            let count = frame.node.as_node().entry.child_counts[slot] as u64;

            if count == 0 {
                self.stack.last_mut().expect("checked above").next_slot += 1;
                continue;
            }
            if count <= remaining {
                remaining -= count;
                self.cursor += count as i64;
                self.stack.last_mut().expect("checked above").next_slot += 1;
                continue;
            }

            // count > remaining > 0: a leaf slot's count is at most 1, so this
            // only happens at a path slot, and only this one subtree needs a
            // partial skip; recurse into it instead of jumping past it.
            let action = frame.slot_action(slot);
            self.stack.last_mut().expect("checked above").next_slot += 1;
            match action {
                SlotAction::DescendBorrowed(child) => {
                    self.stack.push(Frame {
                        node: NodeCow::Borrowed(child),
                        next_slot: 0,
                    });
                }
                SlotAction::DescendOwned(hash) => {
                    let loaded = load_path_child(&hash, self.store, self.params)?;
                    self.stack.push(Frame {
                        node: NodeCow::Owned(loaded),
                        next_slot: 0,
                    });
                }
                SlotAction::Skip | SlotAction::Value(..) | SlotAction::LoadLeafValue(..) => {
                    unreachable!("count > remaining > 0 only occurs at an unvisited path slot")
                }
            }
        }
        Ok(n - remaining)
    }

    /// Collects every populated `(id, value)` pair with `id` in
    /// `[start, end)`, consuming the iterator.
    pub fn collect_range(mut self, start: i64, end: i64) -> Result<Vec<(i64, Vec<u8>)>> {
        let mut out = Vec::new();
        while let Some((id, value)) = self.next()? {
            if id < start {
                continue;
            }
            if id >= end {
                break;
            }
            out.push((id, value));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::params::Degree;
    use crate::storage::MemoryStore;
    use crate::tree::MerkleSortedTree;

    fn small_params() -> TreeParams {
        TreeParams::new(Degree::Four, HashAlgorithm::Sha256, b"mst/".to_vec())
    }

    #[test]
    fn iterates_in_ascending_id_order() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        for id in [500_000i64, 1, 3, 2, 999_999, 0] {
            tree.set(id, format!("v{id}").into_bytes()).unwrap();
        }

        let mut iter = tree.iterator();
        let mut seen = Vec::new();
        while let Some((id, value)) = iter.next().unwrap() {
            seen.push((id, value));
        }

        let mut expected_ids: Vec<i64> = vec![500_000, 1, 3, 2, 999_999, 0];
        expected_ids.sort_unstable();
        let actual_ids: Vec<i64> = seen.iter().map(|(id, _)| *id).collect();
        assert_eq!(actual_ids, expected_ids);
        assert_eq!(seen.len(), iter.total_count() as usize);
    }

    #[test]
    fn iterates_over_a_lazily_loaded_committed_tree() {
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store.clone(), small_params());
        let mut ids = vec![10i64, 20, 2_000_000, 7];
        for &id in &ids {
            tree.set(id, format!("v{id}").into_bytes()).unwrap();
        }
        let root_hash = tree.commit().unwrap();

        let mut reopened = MerkleSortedTree::open(store, small_params(), &root_hash, true).unwrap();
        let mut iter = reopened.iterator();
        let mut seen = Vec::new();
        while let Some((id, value)) = iter.next().unwrap() {
            assert_eq!(value, format!("v{id}").into_bytes());
            seen.push(id);
        }
        ids.sort_unstable();
        assert_eq!(seen, ids);
        assert_eq!(reopened.count(), ids.len() as i64);
    }

    #[test]
    fn skip_advances_without_materializing() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        for id in 0..10i64 {
            tree.set(id * 100, vec![id as u8]).unwrap();
        }
        let mut iter = tree.iterator();
        let skipped = iter.skip(5).unwrap();
        assert_eq!(skipped, 5);
        let (next_id, _) = iter.next().unwrap().expect("five more entries remain");
        assert_eq!(next_id, 500);
    }

    #[test]
    fn collect_range_filters_by_id() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        for id in [10i64, 250, 999, 5_000, 5_001] {
            tree.set(id, vec![1]).unwrap();
        }
        let collected = tree.iterator().collect_range(100, 5_001).unwrap();
        let ids: Vec<i64> = collected.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![250, 999, 5_000]);
    }

    #[test]
    fn empty_tree_iterates_to_nothing() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        let mut iter = tree.iterator();
        assert!(!iter.has_next());
        assert_eq!(iter.next().unwrap(), None);
        assert_eq!(iter.total_count(), 0);
    }
}
