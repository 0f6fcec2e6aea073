// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! Merkle proofs along the access path (spec §4.1 `get_proof`). Unlike a
//! classic sibling-path Merkle proof, this tree's proof is the literal
//! sequence of node digests from root to leaf value: verifying it means
//! re-fetching each node's stored bytes and checking that it really
//! contains the next digest in the sequence at the id's slot.

use crate::codec::IndexEntry;
use crate::error::{MstError, Result};
use crate::hash::Digest;
use crate::params::TreeParams;
use crate::storage::KvStore;

/// The sequence of hashes encountered on the path from root to a leaf
/// value: every `IndexEntry` traversed, then the leaf payload digest.
/// Ordered root-first.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Proof {
    path: Vec<Digest>,
}

impl Proof {
    pub(crate) fn new(path: Vec<Digest>) -> Self {
        Self { path }
    }

    pub fn digests(&self) -> &[Digest] {
        &self.path
    }

    /// Recomputes the chain of hashes this proof describes against `store`
    /// and checks that it authenticates `value` at `id` under
    /// `expected_root_hash`. Only meaningful for a committed tree: a proof
    /// collected before `commit()` names nodes that were never written to
    /// `store` and will fail to fetch.
    pub fn verify<S: KvStore>(
        &self,
        store: &S,
        params: &TreeParams,
        expected_root_hash: &Digest,
        id: i64,
        value: &[u8],
    ) -> Result<bool> {
        if self.path.is_empty() {
            return Ok(false);
        }
        if self.path[0] != *expected_root_hash {
            return Ok(false);
        }

        for window in self.path.windows(2) {
            let (node_hash, next_hash) = (&window[0], &window[1]);
            let key = params.storage_key(node_hash.as_bytes());
            let bytes = store
                .get(&key)
                .map_err(MstError::StorageFailure)?
                .ok_or_else(|| MstError::NotFound {
                    digest: node_hash.clone(),
                })?;
            if params.verify_on_load && !params.hash_algorithm.verify(node_hash, &bytes) {
                return Ok(false);
            }
            let entry = IndexEntry::decode(&bytes)?;
            if !entry_contains(&entry, id) {
                return Ok(false);
            }
            let slot = ((id - entry.offset) / entry.step) as usize;
            match &entry.child_hashes[slot] {
                Some(hash) if hash == next_hash => {}
                _ => return Ok(false),
            }
        }

        let leaf_value_hash = params.hash_algorithm.hash(value);
        Ok(self.path.last() == Some(&leaf_value_hash))
    }
}

fn entry_contains(entry: &IndexEntry, id: i64) -> bool {
    let span = entry.step * entry.degree() as i64;
    id >= entry.offset && id < entry.offset + span
}
