// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! The KV storage adapter contract (spec §6.1) and an in-memory
//! implementation used by tests, mirroring the teacher's `MockTreeStore`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// A put-if-absent byte store keyed by prefixed digest. Implementations are
/// expected to be crash-consistent at the granularity of one
/// `put_if_absent` call; the tree never batches or fsyncs on their behalf.
pub trait KvStore {
    /// Returns the stored value, or `None` if `key` is absent.
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// Stores `(key, value)` atomically if `key` was not already present.
    /// Returns `true` on a write, `false` if the key already existed (the
    /// existing value is guaranteed equal, since keys are content hashes).
    fn put_if_absent(&self, key: &[u8], value: Vec<u8>) -> anyhow::Result<bool>;
}

/// An in-memory [`KvStore`], guarded by a single mutex. Intended for tests
/// and for callers without a durable backing store. Cloning shares the
/// same backing map (`Arc`), so a store can be handed to one tree, then a
/// clone handed to a second tree opened against a hash the first wrote.
#[derive(Default, Clone)]
pub struct MemoryStore(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconditionally overwrites `key`, bypassing put-if-absent semantics.
    /// Not part of the `KvStore` contract; a test-only hook for injecting
    /// corruption (spec §8 scenario S6).
    #[cfg(test)]
    pub(crate) fn corrupt(&self, key: &[u8], value: Vec<u8>) {
        self.0.lock().insert(key.to_vec(), value);
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.0.lock().get(key).cloned())
    }

    fn put_if_absent(&self, key: &[u8], value: Vec<u8>) -> anyhow::Result<bool> {
        let mut guard = self.0.lock();
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_vec(), value);
        Ok(true)
    }
}
