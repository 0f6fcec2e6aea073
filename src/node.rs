// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node types: a [`Node`] is a tagged sum over the two layer kinds
//! described in spec §4.2 — a path node, whose children are nested
//! [`IndexEntry`] nodes, and a leaf node, whose children are opaque user
//! payload bytes. Both share the same `IndexEntry` fields; only the child
//! type differs, so the distinction is a variant of [`NodeBody`] rather
//! than two separate structs.

use crate::codec::IndexEntry;
use crate::error::{MstError, Result};
use crate::hash::Digest;

/// A path node's child slot: either genuinely empty, populated on disk but
/// not yet loaded into memory, or loaded.
#[derive(Debug)]
pub(crate) enum ChildRef {
    Empty,
    Unloaded,
    Loaded(Box<Node>),
}

/// A leaf node's child slot: same three states, but the loaded form is raw
/// payload bytes rather than another node.
#[derive(Debug)]
pub(crate) enum LeafRef {
    Empty,
    Unloaded,
    Loaded(Vec<u8>),
}

#[derive(Debug)]
pub(crate) enum NodeBody {
    Path(Vec<ChildRef>),
    Leaf(Vec<LeafRef>),
}

/// A node in the in-memory tree graph: clean (loaded from storage,
/// unmodified, hash known to its parent) or dirty (created or modified,
/// hash not yet computed). `original_hashes`/`original_counts` are the
/// per-slot snapshot captured when the node was last clean, used by
/// `cancel` to undo in-memory edits without back-pointers (spec §4.1).
#[derive(Debug)]
pub(crate) struct Node {
    pub entry: IndexEntry,
    pub body: NodeBody,
    pub original_hashes: Vec<Option<Digest>>,
    pub original_counts: Vec<i64>,
    pub dirty: bool,
}

impl Node {
    pub fn degree(&self) -> usize {
        self.entry.degree()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf(_))
    }

    pub fn total_count(&self) -> i64 {
        self.entry.total_count()
    }

    /// A freshly created, empty path node covering `[offset, offset + step*degree)`.
    pub fn new_path(offset: i64, step: i64, degree: usize) -> Self {
        let mut children = Vec::with_capacity(degree);
        children.resize_with(degree, || ChildRef::Empty);
        Node {
            entry: IndexEntry::new_empty(offset, step, degree),
            body: NodeBody::Path(children),
            original_hashes: vec![None; degree],
            original_counts: vec![0; degree],
            dirty: true,
        }
    }

    /// A freshly created, empty leaf node covering `[offset, offset + degree)`.
    pub fn new_leaf(offset: i64, degree: usize) -> Self {
        let mut children = Vec::with_capacity(degree);
        children.resize_with(degree, || LeafRef::Empty);
        Node {
            entry: IndexEntry::new_empty(offset, 1, degree),
            body: NodeBody::Leaf(children),
            original_hashes: vec![None; degree],
            original_counts: vec![0; degree],
            dirty: true,
        }
    }

    /// Reconstructs an in-memory node from a decoded [`IndexEntry`] freshly
    /// loaded from storage: clean, with every slot `Unloaded` (populated
    /// slots will be fetched lazily on first visit).
    pub fn from_entry(entry: IndexEntry) -> Self {
        let degree = entry.degree();
        let original_hashes = entry.child_hashes.clone();
        let original_counts = entry.child_counts.clone();
        let body = if entry.step == 1 {
            let mut children = Vec::with_capacity(degree);
            for hash in &entry.child_hashes {
                children.push(match hash {
                    Some(_) => LeafRef::Unloaded,
                    None => LeafRef::Empty,
                });
            }
            NodeBody::Leaf(children)
        } else {
            let mut children = Vec::with_capacity(degree);
            for hash in &entry.child_hashes {
                children.push(match hash {
                    Some(_) => ChildRef::Unloaded,
                    None => ChildRef::Empty,
                });
            }
            NodeBody::Path(children)
        };
        Node {
            entry,
            body,
            original_hashes,
            original_counts,
            dirty: false,
        }
    }

    /// Whether `id` falls within this node's span.
    pub fn contains(&self, id: i64) -> bool {
        let span = self.entry.step * self.degree() as i64;
        id >= self.entry.offset && id < self.entry.offset + span
    }

    /// The slot index covering `id`, assuming `self.contains(id)`.
    pub fn slot_for(&self, id: i64) -> usize {
        ((id - self.entry.offset) / self.entry.step) as usize
    }

    /// Installs `child` (which must satisfy the constraints of spec §4.2:
    /// its `step` strictly less than this node's, its `offset` inside this
    /// slot's range) at `slot`, marking this node and the slot dirty.
    pub fn set_path_child(&mut self, slot: usize, child: Box<Node>) -> Result<()> {
        if child.entry.step >= self.entry.step {
            return Err(MstError::BadChild {
                offset: child.entry.offset,
                step: child.entry.step,
                parent_offset: self.entry.offset,
                parent_step: self.entry.step,
            });
        }
        let slot_offset = self.entry.offset + slot as i64 * self.entry.step;
        if child.entry.offset < slot_offset || child.entry.offset >= slot_offset + self.entry.step {
            return Err(MstError::BadChild {
                offset: child.entry.offset,
                step: child.entry.step,
                parent_offset: self.entry.offset,
                parent_step: self.entry.step,
            });
        }
        self.entry.child_counts[slot] = child.total_count();
        self.entry.child_hashes[slot] = None;
        self.dirty = true;
        match &mut self.body {
            NodeBody::Path(children) => children[slot] = ChildRef::Loaded(child),
            NodeBody::Leaf(_) => unreachable!("set_path_child called on a leaf node"),
        }
        Ok(())
    }

    pub fn set_leaf_value(&mut self, slot: usize, value: Vec<u8>) {
        self.entry.child_counts[slot] = 1;
        self.entry.child_hashes[slot] = None;
        self.dirty = true;
        match &mut self.body {
            NodeBody::Leaf(children) => children[slot] = LeafRef::Loaded(value),
            NodeBody::Path(_) => unreachable!("set_leaf_value called on a path node"),
        }
    }

    /// Snapshots the current `entry` fields as the new clean baseline and
    /// clears `dirty`. Called once this node's bytes have been durably
    /// written during `commit`.
    pub fn mark_committed(&mut self) {
        self.original_hashes = self.entry.child_hashes.clone();
        self.original_counts = self.entry.child_counts.clone();
        self.dirty = false;
    }
}
