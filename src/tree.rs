// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Merkle Sorted Tree itself (spec §4): a sparse, content-addressed,
//! N-ary index over a fixed numeric id space, staged in memory and
//! persisted to a [`KvStore`] on `commit`.
//!
//! The recursive merge that installs a new id mirrors the teacher's
//! `insert_at`/`insert_at_internal_node` shape: ownership of the subtree
//! moves in, mutation happens in place (or a replacement is built), and
//! the result is handed back up the call stack. The one addition this
//! tree needs that a plain trie doesn't is collapsing: a freshly created
//! leaf subtree starts at `step = 1` directly under whatever path node
//! first needed it, skipping the full chain of intermediate levels: the
//! only real constraint is that an installed child's `step` stays
//! strictly below its parent's (spec §4.2). When a later `set` lands
//! inside that slot's range but outside the collapsed child's own
//! (narrower) span, the merge grows a fresh common ancestor by repeatedly
//! widening the step until both spans share a slot.

use std::mem;

use backtrace::Backtrace;

use crate::codec::IndexEntry;
use crate::error::{MstError, Result};
use crate::hash::Digest;
use crate::iterator::MstIterator;
use crate::node::{ChildRef, LeafRef, Node, NodeBody};
use crate::params::TreeParams;
use crate::proof::Proof;
use crate::storage::KvStore;

/// A node the tree expected storage to have simply wasn't there: dataset
/// corruption or a dependency the caller failed to migrate alongside this
/// tree. Logs a backtrace at `debug` before surfacing `NotFound`, since by
/// the time this bubbles up through a caller's own error wrapping the
/// in-tree call site is usually gone.
fn not_found(digest: Digest) -> MstError {
    tracing::debug!(digest = ?digest, backtrace = ?Backtrace::new(), "node missing from storage");
    MstError::NotFound { digest }
}

/// An authenticated, persistent, sparse N-ary index over `[0, MAX_COUNT)`
/// (spec §3, §4). Mutating calls require a non-read-only tree; reads work
/// either way.
pub struct MerkleSortedTree<S: KvStore> {
    store: S,
    params: TreeParams,
    root: Box<Node>,
    read_only: bool,
    /// Whether this tree has ever produced a committed root (via `commit`,
    /// or by being `open`ed against one). `root_hash` consults this to
    /// tell a genuinely never-committed empty tree (nil root hash, spec
    /// §6.4/§4.1) apart from one that merely has no populated ids right
    /// now but was committed at least once.
    ever_committed: bool,
}

impl<S: KvStore> MerkleSortedTree<S> {
    /// Creates a brand new, empty tree spanning the whole id space allowed
    /// by `params.degree`.
    pub fn new_empty(store: S, params: TreeParams) -> Self {
        let width = params.degree.width();
        let root_step = params.max_count / width as i64;
        let root = Node::new_path(0, root_step, width);
        MerkleSortedTree {
            store,
            params,
            root: Box::new(root),
            read_only: false,
            ever_committed: false,
        }
    }

    /// Opens a tree previously persisted under `root_digest`.
    pub fn open(store: S, params: TreeParams, root_digest: &Digest, read_only: bool) -> Result<Self> {
        let key = params.storage_key(root_digest.as_bytes());
        let bytes = store
            .get(&key)
            .map_err(MstError::StorageFailure)?
            .ok_or_else(|| not_found(root_digest.clone()))?;
        if params.verify_on_load && !params.hash_algorithm.verify(root_digest, &bytes) {
            return Err(MstError::HashMismatch {
                digest: root_digest.clone(),
            });
        }
        let entry = IndexEntry::decode(&bytes).map_err(|e| MstError::BadRoot {
            reason: format!("root record is not a valid IndexEntry: {e}"),
        })?;
        let width = params.degree.width();
        if entry.degree() != width {
            return Err(MstError::BadRoot {
                reason: format!(
                    "root degree {} does not match configured width {}",
                    entry.degree(),
                    width
                ),
            });
        }
        let expected_step = params.max_count / width as i64;
        if entry.offset != 0 || entry.step != expected_step {
            return Err(MstError::BadRoot {
                reason: format!(
                    "root span offset={} step={} does not cover the configured id space",
                    entry.offset, entry.step
                ),
            });
        }
        tracing::debug!(digest = ?root_digest, "opened tree root");
        Ok(MerkleSortedTree {
            store,
            params,
            root: Box::new(Node::from_entry(entry)),
            read_only,
            ever_committed: true,
        })
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Total number of populated ids under this tree.
    pub fn count(&self) -> i64 {
        self.root.total_count()
    }

    /// The content hash of the root, recomputed from any in-memory,
    /// uncommitted edits, or `None` for an empty tree that has never been
    /// committed (spec §6.4, §4.1). Two trees holding the same populated
    /// ids under the same parameters always agree on this value when it is
    /// `Some` (spec §4.4).
    pub fn root_hash(&mut self) -> Option<Digest> {
        if !self.ever_committed && self.count() == 0 {
            return None;
        }
        Some(node_hash(&mut self.root, &self.params))
    }

    fn validate_id(&self, id: i64) -> Result<()> {
        if id < 0 || id >= self.params.max_count {
            return Err(MstError::BadId {
                id,
                max_count: self.params.max_count,
            });
        }
        Ok(())
    }

    /// Looks up `id`, lazily loading any unvisited nodes on the path to it.
    pub fn get(&mut self, id: i64) -> Result<Option<Vec<u8>>> {
        self.validate_id(id)?;
        get_recursive(&mut self.root, id, &self.store, &self.params)
    }

    /// Installs `value` at `id`. `id` must already be unpopulated unless
    /// `params.duplicate_policy` allows overwriting it.
    pub fn set(&mut self, id: i64, value: Vec<u8>) -> Result<()> {
        if self.read_only {
            return Err(MstError::ReadOnly);
        }
        self.validate_id(id)?;
        merge_into(&mut self.root, id, value, &self.store, &self.params)
    }

    /// Applies a batch of `(id, value)` pairs in order, grounded in the
    /// teacher's `UpdateSet` batching convenience.
    pub fn set_all<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (i64, Vec<u8>)>,
    {
        for (id, value) in entries {
            self.set(id, value)?;
        }
        Ok(())
    }

    /// Builds the digest path authenticating `id`'s value under the
    /// current (possibly uncommitted) root hash, or `None` if `id` is
    /// unpopulated.
    pub fn get_proof(&mut self, id: i64) -> Result<Option<Proof>> {
        self.validate_id(id)?;
        if get_recursive(&mut self.root, id, &self.store, &self.params)?.is_none() {
            return Ok(None);
        }
        node_hash(&mut self.root, &self.params);
        let mut path = Vec::new();
        collect_proof_path(&self.root, id, &self.params, &mut path);
        Ok(Some(Proof::new(path)))
    }

    /// A lazily-expanding in-order walk over every populated id (spec §4.3).
    pub fn iterator(&self) -> MstIterator<'_, S> {
        MstIterator::new(&self.root, &self.store, &self.params)
    }

    /// Writes every dirty node (and leaf value) to storage, bottom-up, and
    /// returns the new root hash. A no-op commit (nothing dirty) still
    /// returns the current root hash.
    pub fn commit(&mut self) -> Result<Digest> {
        if self.read_only {
            return Err(MstError::ReadOnly);
        }
        let digest = commit_node(&mut self.root, &self.store, &self.params)?;
        self.ever_committed = true;
        tracing::debug!(digest = ?digest, "committed tree root");
        Ok(digest)
    }

    /// Discards every uncommitted edit, restoring the tree to the state of
    /// its last `commit` (or `open`), without needing to re-read storage
    /// for nodes that were only ever visited, not modified.
    pub fn cancel(&mut self) {
        cancel_node(&mut self.root);
    }
}

fn node_hash(node: &mut Node, params: &TreeParams) -> Digest {
    match &mut node.body {
        NodeBody::Path(children) => {
            for (slot, child) in children.iter_mut().enumerate() {
                if let ChildRef::Loaded(child_node) = child {
                    let hash = node_hash(child_node, params);
                    node.entry.child_hashes[slot] = Some(hash);
                }
            }
        }
        NodeBody::Leaf(children) => {
            for (slot, child) in children.iter_mut().enumerate() {
                if let LeafRef::Loaded(value) = child {
                    node.entry.child_hashes[slot] = Some(params.hash_algorithm.hash(value));
                }
            }
        }
    }
    params.hash_algorithm.hash(&node.entry.encode())
}

fn collect_proof_path(node: &Node, id: i64, params: &TreeParams, path: &mut Vec<Digest>) {
    path.push(params.hash_algorithm.hash(&node.entry.encode()));
    let slot = node.slot_for(id);
    match &node.body {
        NodeBody::Path(children) => {
            if let ChildRef::Loaded(child) = &children[slot] {
                collect_proof_path(child, id, params, path);
            }
        }
        NodeBody::Leaf(children) => {
            if let LeafRef::Loaded(value) = &children[slot] {
                path.push(params.hash_algorithm.hash(value));
            }
        }
    }
}

pub(crate) fn load_path_child<S: KvStore>(
    digest: &Digest,
    store: &S,
    params: &TreeParams,
) -> Result<Box<Node>> {
    let key = params.storage_key(digest.as_bytes());
    let bytes = store
        .get(&key)
        .map_err(MstError::StorageFailure)?
        .ok_or_else(|| not_found(digest.clone()))?;
    if params.verify_on_load && !params.hash_algorithm.verify(digest, &bytes) {
        return Err(MstError::HashMismatch {
            digest: digest.clone(),
        });
    }
    let entry = IndexEntry::decode(&bytes)?;
    tracing::debug!(digest = ?digest, "loaded path node");
    Ok(Box::new(Node::from_entry(entry)))
}

pub(crate) fn load_leaf_value<S: KvStore>(digest: &Digest, store: &S, params: &TreeParams) -> Result<Vec<u8>> {
    let key = params.storage_key(digest.as_bytes());
    let bytes = store
        .get(&key)
        .map_err(MstError::StorageFailure)?
        .ok_or_else(|| not_found(digest.clone()))?;
    if params.verify_on_load && !params.hash_algorithm.verify(digest, &bytes) {
        return Err(MstError::HashMismatch {
            digest: digest.clone(),
        });
    }
    Ok(bytes)
}

fn get_recursive<S: KvStore>(
    node: &mut Node,
    id: i64,
    store: &S,
    params: &TreeParams,
) -> Result<Option<Vec<u8>>> {
    if !node.contains(id) {
        return Ok(None);
    }
    let slot = node.slot_for(id);
    let hash = node.entry.child_hashes[slot].clone();

    match &mut node.body {
        NodeBody::Path(children) => {
            if matches!(children[slot], ChildRef::Unloaded) {
                let digest = hash.expect("Unloaded slot always has a hash");
                children[slot] = ChildRef::Loaded(load_path_child(&digest, store, params)?);
            }
            match &mut children[slot] {
                ChildRef::Empty => Ok(None),
                ChildRef::Loaded(child) => get_recursive(child, id, store, params),
                ChildRef::Unloaded => unreachable!("just loaded"),
            }
        }
        NodeBody::Leaf(children) => {
            if matches!(children[slot], LeafRef::Unloaded) {
                let digest = hash.expect("Unloaded slot always has a hash");
                children[slot] = LeafRef::Loaded(load_leaf_value(&digest, store, params)?);
            }
            match &children[slot] {
                LeafRef::Empty => Ok(None),
                LeafRef::Loaded(value) => Ok(Some(value.clone())),
                LeafRef::Unloaded => unreachable!("just loaded"),
            }
        }
    }
}

fn create_leaf_subtree(id: i64, value: Vec<u8>, width: usize) -> Node {
    let width_i64 = width as i64;
    let offset = id.div_euclid(width_i64) * width_i64;
    let mut leaf = Node::new_leaf(offset, width);
    let slot = (id - offset) as usize;
    leaf.set_leaf_value(slot, value);
    leaf
}

/// Builds the smallest path node that can parent both `a` and `b`, by
/// doubling the candidate step (in multiples of `width`) until their
/// offsets land in distinct slots of a common, width-aligned span.
fn build_common_ancestor(a: Box<Node>, b: Box<Node>, width: usize) -> Result<Box<Node>> {
    let width_i64 = width as i64;
    let mut step = a.entry.step.max(b.entry.step) * width_i64;
    loop {
        let span = step * width_i64;
        let ancestor_offset = a.entry.offset.div_euclid(span) * span;
        let b_in_range = b.entry.offset >= ancestor_offset && b.entry.offset < ancestor_offset + span;
        if b_in_range {
            let a_slot = ((a.entry.offset - ancestor_offset) / step) as usize;
            let b_slot = ((b.entry.offset - ancestor_offset) / step) as usize;
            if a_slot != b_slot {
                let mut ancestor = Node::new_path(ancestor_offset, step, width);
                ancestor.set_path_child(a_slot, a)?;
                ancestor.set_path_child(b_slot, b)?;
                return Ok(Box::new(ancestor));
            }
        }
        step *= width_i64;
    }
}

fn child_slot_contains(node: &Node, slot: usize, id: i64) -> bool {
    if let NodeBody::Path(children) = &node.body {
        if let ChildRef::Loaded(child) = &children[slot] {
            return child.contains(id);
        }
    }
    false
}

/// Installs `value` at `id` somewhere under `node`, which must already
/// contain `id` in its span.
fn merge_into<S: KvStore>(
    node: &mut Node,
    id: i64,
    value: Vec<u8>,
    store: &S,
    params: &TreeParams,
) -> Result<()> {
    let slot = node.slot_for(id);

    if node.is_leaf() {
        let hash = node.entry.child_hashes[slot].clone();
        let children = match &mut node.body {
            NodeBody::Leaf(c) => c,
            NodeBody::Path(_) => unreachable!(),
        };
        if matches!(children[slot], LeafRef::Unloaded) {
            let digest = hash.expect("Unloaded slot always has a hash");
            children[slot] = LeafRef::Loaded(load_leaf_value(&digest, store, params)?);
        }
        let existing = match &children[slot] {
            LeafRef::Loaded(v) => Some(v.as_slice()),
            LeafRef::Empty => None,
            LeafRef::Unloaded => unreachable!("just loaded"),
        };
        let resolved = (params.duplicate_policy)(id, existing, &value)?;
        if let Some(new_value) = resolved {
            node.set_leaf_value(slot, new_value);
        }
        return Ok(());
    }

    enum Action {
        Empty,
        NeedLoad(Digest),
        Recurse,
    }

    let action = {
        let children = match &node.body {
            NodeBody::Path(c) => c,
            NodeBody::Leaf(_) => unreachable!(),
        };
        match &children[slot] {
            ChildRef::Empty => Action::Empty,
            ChildRef::Unloaded => Action::NeedLoad(
                node.entry.child_hashes[slot]
                    .clone()
                    .expect("Unloaded slot always has a hash"),
            ),
            ChildRef::Loaded(_) => Action::Recurse,
        }
    };

    match action {
        Action::Empty => {
            let leaf = Box::new(create_leaf_subtree(id, value, params.degree.width()));
            node.set_path_child(slot, leaf)?;
        }
        Action::NeedLoad(digest) => {
            let loaded = load_path_child(&digest, store, params)?;
            if let NodeBody::Path(children) = &mut node.body {
                children[slot] = ChildRef::Loaded(loaded);
            }
            return merge_into(node, id, value, store, params);
        }
        Action::Recurse => {
            if child_slot_contains(node, slot, id) {
                let mut new_count = None;
                if let NodeBody::Path(children) = &mut node.body {
                    if let ChildRef::Loaded(child) = &mut children[slot] {
                        merge_into(child, id, value, store, params)?;
                        new_count = Some(child.total_count());
                    }
                }
                node.entry.child_hashes[slot] = None;
                if let Some(count) = new_count {
                    node.entry.child_counts[slot] = count;
                }
                node.dirty = true;
            } else {
                let existing_child = {
                    let children = match &mut node.body {
                        NodeBody::Path(c) => c,
                        NodeBody::Leaf(_) => unreachable!(),
                    };
                    match mem::replace(&mut children[slot], ChildRef::Empty) {
                        ChildRef::Loaded(child) => child,
                        _ => unreachable!("Action::Recurse implies a loaded child"),
                    }
                };
                let new_leaf = Box::new(create_leaf_subtree(id, value, params.degree.width()));
                let ancestor = build_common_ancestor(existing_child, new_leaf, params.degree.width())?;
                node.set_path_child(slot, ancestor)?;
            }
        }
    }
    Ok(())
}

fn commit_node<S: KvStore>(node: &mut Node, store: &S, params: &TreeParams) -> Result<Digest> {
    match &mut node.body {
        NodeBody::Path(children) => {
            for (slot, child) in children.iter_mut().enumerate() {
                if let ChildRef::Loaded(child_node) = child {
                    if child_node.dirty {
                        let digest = commit_node(child_node, store, params)?;
                        node.entry.child_hashes[slot] = Some(digest);
                    }
                }
            }
        }
        NodeBody::Leaf(children) => {
            for (slot, child) in children.iter_mut().enumerate() {
                if let LeafRef::Loaded(value) = child {
                    let digest = params.hash_algorithm.hash(value);
                    let key = params.storage_key(digest.as_bytes());
                    let inserted = store
                        .put_if_absent(&key, value.clone())
                        .map_err(MstError::StorageFailure)?;
                    if !inserted && params.report_duplicate_on_put {
                        return Err(MstError::DuplicatePut { digest });
                    }
                    node.entry.child_hashes[slot] = Some(digest);
                }
            }
        }
    }

    let encoded = node.entry.encode();
    let digest = params.hash_algorithm.hash(&encoded);
    let key = params.storage_key(digest.as_bytes());
    let inserted = store
        .put_if_absent(&key, encoded)
        .map_err(MstError::StorageFailure)?;
    if !inserted && params.report_duplicate_on_put {
        return Err(MstError::DuplicatePut { digest });
    }
    node.mark_committed();
    Ok(digest)
}

/// Reverts a dirty node to the state captured in `original_hashes`/
/// `original_counts` (its last clean snapshot, from `from_entry` or
/// `mark_committed`). A slot whose current hash still matches its original
/// was never touched this session and keeps whatever pointer it has
/// (possibly a clean, lazily-loaded child); a slot that was touched —
/// whether edited in place or replaced outright by a fresh common
/// ancestor (spec §4.1 `merge`) — has its cached pointer dropped rather
/// than patched, so a later visit re-derives it from storage instead of
/// risking a half-undone replacement (spec §4.1 `cancel`).
fn cancel_node(node: &mut Node) {
    if !node.dirty {
        return;
    }
    let original_hashes = node.original_hashes.clone();
    let current_hashes = mem::replace(&mut node.entry.child_hashes, original_hashes.clone());
    node.entry.child_counts = node.original_counts.clone();

    match &mut node.body {
        NodeBody::Path(children) => {
            for (slot, child) in children.iter_mut().enumerate() {
                if current_hashes[slot] == original_hashes[slot] {
                    continue;
                }
                *child = match &original_hashes[slot] {
                    None => ChildRef::Empty,
                    Some(_) => ChildRef::Unloaded,
                };
            }
        }
        NodeBody::Leaf(children) => {
            for (slot, child) in children.iter_mut().enumerate() {
                if current_hashes[slot] == original_hashes[slot] {
                    continue;
                }
                *child = match &original_hashes[slot] {
                    None => LeafRef::Empty,
                    Some(_) => LeafRef::Unloaded,
                };
            }
        }
    }
    node.dirty = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use crate::params::Degree;
    use crate::storage::MemoryStore;

    fn small_params() -> TreeParams {
        TreeParams::new(Degree::Four, HashAlgorithm::Sha256, b"mst/".to_vec())
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(42, b"hello".to_vec()).unwrap();
        assert_eq!(tree.get(42).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(tree.get(43).unwrap(), None);
        assert_eq!(tree.count(), 1);
    }

    #[test]
    fn duplicate_set_is_rejected_by_default() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(7, b"a".to_vec()).unwrap();
        let err = tree.set(7, b"b".to_vec()).unwrap_err();
        assert!(matches!(err, MstError::DuplicateId { id: 7 }));
        assert_eq!(tree.get(7).unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn bad_id_is_rejected() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        let max_count = tree.params().max_count;
        let err = tree.set(-1, b"x".to_vec()).unwrap_err();
        assert!(matches!(err, MstError::BadId { id: -1, .. }));
        let err = tree.set(max_count, b"x".to_vec()).unwrap_err();
        assert!(matches!(err, MstError::BadId { .. }));
    }

    #[test]
    fn commit_then_open_reproduces_same_root_hash() {
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store, small_params());
        for id in [10i64, 20_000, 5, 999_999] {
            tree.set(id, format!("v{id}").into_bytes()).unwrap();
        }
        let root_hash = tree.commit().unwrap();

        let MerkleSortedTree { store, .. } = tree;
        let mut reopened = MerkleSortedTree::open(store, small_params(), &root_hash, false).unwrap();
        assert_eq!(reopened.root_hash(), Some(root_hash.clone()));
        for id in [10i64, 20_000, 5, 999_999] {
            assert_eq!(reopened.get(id).unwrap(), Some(format!("v{id}").into_bytes()));
        }
        assert_eq!(reopened.get(11).unwrap(), None);
    }

    #[test]
    fn commit_is_idempotent_when_nothing_is_dirty() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(1, b"x".to_vec()).unwrap();
        let first = tree.commit().unwrap();
        let second = tree.commit().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cancel_restores_pre_edit_state() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(1, b"x".to_vec()).unwrap();
        let committed_hash = tree.commit().unwrap();

        tree.set(2, b"y".to_vec()).unwrap();
        assert_eq!(tree.get(2).unwrap(), Some(b"y".to_vec()));
        tree.cancel();

        assert_eq!(tree.get(2).unwrap(), None);
        assert_eq!(tree.get(1).unwrap(), Some(b"x".to_vec()));
        assert_eq!(tree.root_hash(), Some(committed_hash));
    }

    #[test]
    fn cancel_on_a_fresh_tree_is_a_no_op() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.cancel();
        assert_eq!(tree.count(), 0);
    }

    #[test]
    fn root_hash_is_nil_only_for_an_empty_never_committed_tree() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        assert_eq!(tree.root_hash(), None);

        // Staged but uncommitted data makes the tree non-empty, so its
        // in-memory hash is observable even before the first commit.
        tree.set(1, b"x".to_vec()).unwrap();
        assert!(tree.root_hash().is_some());

        tree.cancel();
        assert_eq!(tree.root_hash(), None);

        let committed_hash = tree.commit().unwrap();
        assert_eq!(tree.root_hash(), Some(committed_hash));
    }

    #[test]
    fn open_maps_a_malformed_root_record_to_bad_root() {
        let store = MemoryStore::new();
        let params = small_params();
        let garbage = b"not a valid IndexEntry encoding at all".to_vec();
        let digest = params.hash_algorithm.hash(&garbage);
        let key = params.storage_key(digest.as_bytes());
        assert!(store.put_if_absent(&key, garbage).unwrap());

        let err = MerkleSortedTree::open(store, params, &digest, false).unwrap_err();
        assert!(matches!(err, MstError::BadRoot { .. }));
    }

    #[test]
    fn read_only_tree_rejects_mutation() {
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store, small_params());
        tree.set(1, b"x".to_vec()).unwrap();
        let root_hash = tree.commit().unwrap();

        let MerkleSortedTree { store, .. } = tree;
        let mut reader = MerkleSortedTree::open(store, small_params(), &root_hash, true).unwrap();
        let err = reader.set(2, b"y".to_vec()).unwrap_err();
        assert!(matches!(err, MstError::ReadOnly));
    }

    #[test]
    fn count_reflects_ids_added_deep_inside_an_existing_subtree() {
        // 0 and 1 land in the same leaf bucket on the very first insert, so
        // the second `set` recurses through an already-loaded path node
        // rather than building a fresh common ancestor; `count()` must still
        // see both.
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(0, b"a".to_vec()).unwrap();
        tree.set(1, b"b".to_vec()).unwrap();
        tree.set(2, b"c".to_vec()).unwrap();
        assert_eq!(tree.count(), 3);
        let root_hash = tree.commit().unwrap();
        assert_eq!(tree.count(), 3);

        let MerkleSortedTree { store, .. } = tree;
        let reopened = MerkleSortedTree::open(store, small_params(), &root_hash, true).unwrap();
        assert_eq!(reopened.count(), 3);
    }

    #[test]
    fn cancel_after_forcing_a_new_common_ancestor_keeps_prior_data() {
        // set(63) lands far enough from set(0)'s leaf bucket to force
        // `build_common_ancestor`, replacing the slot's child pointer
        // outright rather than editing it in place; cancelling afterwards
        // must still recover id 0 from storage, not just blank the slot.
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store, small_params());
        tree.set(0, b"a".to_vec()).unwrap();
        let committed_hash = tree.commit().unwrap();

        tree.set(63, b"b".to_vec()).unwrap();
        assert_eq!(tree.get(63).unwrap(), Some(b"b".to_vec()));
        tree.cancel();

        assert_eq!(tree.get(63).unwrap(), None);
        assert_eq!(tree.get(0).unwrap(), Some(b"a".to_vec()));
        assert_eq!(tree.count(), 1);
        assert_eq!(tree.root_hash(), Some(committed_hash));
    }

    #[test]
    fn collapsed_leaf_splits_when_a_sibling_id_arrives() {
        // Two ids far enough apart that their natural leaf buckets differ,
        // forced together under degree-4 addressing; exercises
        // `build_common_ancestor` rather than a direct slot-level merge.
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(0, b"a".to_vec()).unwrap();
        tree.set(1_000_000, b"b".to_vec()).unwrap();
        assert_eq!(tree.get(0).unwrap(), Some(b"a".to_vec()));
        assert_eq!(tree.get(1_000_000).unwrap(), Some(b"b".to_vec()));
        assert_eq!(tree.count(), 2);
    }

    #[test]
    fn lazy_load_only_touches_the_accessed_path() {
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store, small_params());
        tree.set(5, b"a".to_vec()).unwrap();
        tree.set(2_000_000, b"b".to_vec()).unwrap();
        let root_hash = tree.commit().unwrap();

        let MerkleSortedTree { store, .. } = tree;
        let mut reopened = MerkleSortedTree::open(store, small_params(), &root_hash, true).unwrap();
        assert_eq!(reopened.get(5).unwrap(), Some(b"a".to_vec()));
        if let NodeBody::Path(children) = &reopened.root.body {
            let populated_slots = children
                .iter()
                .filter(|c| !matches!(c, ChildRef::Empty))
                .count();
            assert!(populated_slots >= 1);
        }
    }

    #[test]
    fn custom_duplicate_policy_allows_overwrite() {
        use std::sync::Arc;
        let mut params = small_params();
        params.duplicate_policy = Arc::new(|_id, _existing, new| Ok(Some(new.to_vec())));
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), params);
        tree.set(3, b"first".to_vec()).unwrap();
        tree.set(3, b"second".to_vec()).unwrap();
        assert_eq!(tree.get(3).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn get_proof_verifies_against_a_committed_root() {
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store, small_params());
        tree.set(1, b"a".to_vec()).unwrap();
        tree.set(2, b"b".to_vec()).unwrap();
        tree.set(500_000, b"c".to_vec()).unwrap();
        let root_hash = tree.commit().unwrap();

        let proof = tree.get_proof(1).unwrap().expect("id 1 is populated");
        let params = small_params();
        assert!(proof
            .verify(&tree.store, &params, &root_hash, 1, b"a")
            .unwrap());
        assert!(!proof
            .verify(&tree.store, &params, &root_hash, 1, b"wrong-value")
            .unwrap());
    }

    #[test]
    fn get_proof_is_none_for_unpopulated_id() {
        let mut tree = MerkleSortedTree::new_empty(MemoryStore::new(), small_params());
        tree.set(1, b"a".to_vec()).unwrap();
        assert!(tree.get_proof(2).unwrap().is_none());
    }

    #[test]
    fn verify_on_load_catches_a_corrupted_leaf() {
        let store = MemoryStore::new();
        let mut params = small_params();
        params.verify_on_load = true;
        let mut tree = MerkleSortedTree::new_empty(store, params.clone());
        tree.set(9, b"original".to_vec()).unwrap();
        let root_hash = tree.commit().unwrap();

        let MerkleSortedTree { store, .. } = tree;
        let leaf_digest = params.hash_algorithm.hash(b"original");
        let key = params.storage_key(leaf_digest.as_bytes());
        store.corrupt(&key, b"tampered".to_vec());

        let mut reopened = MerkleSortedTree::open(store, params, &root_hash, true).unwrap();
        let err = reopened.get(9).unwrap_err();
        assert!(matches!(err, MstError::HashMismatch { .. }));
    }

    /// Grounded in the teacher's `many_keys_get_proof_and_verify_tree_root`
    /// (`jellyfish_merkle_test.rs`): a seeded RNG drives many random ids
    /// through one tree, and every one of them must still produce a
    /// proof that verifies against the committed root.
    #[test]
    fn many_random_ids_get_proof_and_verify() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0xc0ffee);
        let store = MemoryStore::new();
        let mut tree = MerkleSortedTree::new_empty(store.clone(), small_params());
        let max_count = tree.params().max_count;

        let mut ids = std::collections::BTreeSet::new();
        while ids.len() < 200 {
            ids.insert(rng.gen_range(0..max_count));
        }
        let entries: Vec<(i64, Vec<u8>)> = ids
            .iter()
            .map(|&id| (id, format!("value-{id}").into_bytes()))
            .collect();
        tree.set_all(entries.clone()).unwrap();
        let root_hash = tree.commit().unwrap();

        let params = small_params();
        for (id, value) in &entries {
            let proof = tree.get_proof(*id).unwrap().expect("just committed");
            assert!(proof.verify(&store, &params, &root_hash, *id, value).unwrap());
        }
        assert_eq!(tree.count(), entries.len() as i64);
    }

    #[test]
    fn without_verify_on_load_a_corrupted_leaf_does_not_panic() {
        let store = MemoryStore::new();
        let params = small_params();
        let mut tree = MerkleSortedTree::new_empty(store, params.clone());
        tree.set(9, b"original".to_vec()).unwrap();
        let root_hash = tree.commit().unwrap();

        let MerkleSortedTree { store, .. } = tree;
        let leaf_digest = params.hash_algorithm.hash(b"original");
        let key = params.storage_key(leaf_digest.as_bytes());
        store.corrupt(&key, b"tampered".to_vec());

        let mut reopened = MerkleSortedTree::open(store, params, &root_hash, true).unwrap();
        assert_eq!(reopened.get(9).unwrap(), Some(b"tampered".to_vec()));
    }
}
