// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the Merkle Sorted Tree. One variant per row of the
//! error table: no error is retried inside the tree, and a missing id is
//! `None`, never an error.

use thiserror::Error;

use crate::hash::Digest;

/// Errors raised by [`crate::tree::MerkleSortedTree`] operations.
#[derive(Debug, Error)]
pub enum MstError {
    /// `id` fell outside `[0, MAX_COUNT)`.
    #[error("id {id} out of range [0, {max_count})")]
    BadId { id: i64, max_count: i64 },

    /// `set` targeted an already-populated id under the reject policy.
    #[error("id {id} is already populated")]
    DuplicateId { id: i64 },

    /// A mutating call was made on a tree opened read-only.
    #[error("tree is read-only")]
    ReadOnly,

    /// The KV store returned nothing for a node the tree expected to exist.
    #[error("node {digest:?} not found in storage")]
    NotFound { digest: Digest },

    /// `verify_on_load` rejected the bytes loaded for `digest`.
    #[error("hash mismatch loading node {digest:?}")]
    HashMismatch { digest: Digest },

    /// A child was installed with an `(offset, step)` inconsistent with its parent.
    #[error("bad child: offset={offset} step={step} does not fit parent offset={parent_offset} step={parent_step}")]
    BadChild {
        offset: i64,
        step: i64,
        parent_offset: i64,
        parent_step: i64,
    },

    /// `open` was given a root whose degree is unsupported or whose encoding is malformed.
    #[error("bad root: {reason}")]
    BadRoot { reason: String },

    /// `put_if_absent` reported an existing key while `report_duplicate_on_put` was set.
    #[error("duplicate put of node {digest:?}")]
    DuplicatePut { digest: Digest },

    /// The KV store adapter raised an I/O error.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] anyhow::Error),

    /// The on-disk bytes for a node could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, MstError>;
