// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tree parameters, fixed for the lifetime of a tree (spec §3.1).

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{MstError, Result};
use crate::hash::HashAlgorithm;

/// The branching factor of every internal node. The source supports several;
/// this crate supports the same three, chosen so `DEGREE^MAX_DEPTH` stays
/// just under `2^63` (see DESIGN.md / SPEC_FULL.md §9 for the table).
/// `Serialize`/`Deserialize` let a dataset built on top of a tree persist
/// its choice of degree alongside its own configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Degree {
    Four,
    Eight,
    Sixteen,
}

/// Stand-in for the source's `TreeDegree.Dn` lookup table (spec §9's first
/// Open Question): `(width, max_depth)` pairs, each chosen so
/// `width^max_depth` stays just under `2^63`. Built once and shared rather
/// than recomputed per lookup.
static DEGREE_TABLE: Lazy<[(usize, u32); 3]> = Lazy::new(|| [(4, 30), (8, 20), (16, 15)]);

impl Degree {
    pub fn width(self) -> usize {
        match self {
            Degree::Four => 4,
            Degree::Eight => 8,
            Degree::Sixteen => 16,
        }
    }

    /// `MAX_DEPTH`: number of levels from root to leaf layer such that
    /// `DEGREE^MAX_DEPTH` fits strictly inside the positive range of an i64.
    pub fn max_depth(self) -> u32 {
        DEGREE_TABLE
            .iter()
            .find(|(width, _)| *width == self.width())
            .map(|(_, depth)| *depth)
            .expect("every Degree variant has a DEGREE_TABLE entry")
    }

    /// `MAX_COUNT`: the exclusive upper bound on legal ids.
    pub fn max_count(self) -> i64 {
        more_asserts::debug_assert_le!(self.max_depth(), 62, "DEGREE^MAX_DEPTH must fit under 2^63");
        (self.width() as i64).pow(self.max_depth())
    }

    pub fn from_width(width: usize) -> Option<Self> {
        match width {
            4 => Some(Degree::Four),
            8 => Some(Degree::Eight),
            16 => Some(Degree::Sixteen),
            _ => None,
        }
    }
}

/// `(id, existing_value, new_value) -> value_to_store`. The default rejects
/// writes to an already-populated id (`DuplicateId`); a caller may supply a
/// different policy to allow overwrite or merge (spec §4.1, §9).
pub type DuplicatePolicy =
    Arc<dyn Fn(i64, Option<&[u8]>, &[u8]) -> Result<Option<Vec<u8>>> + Send + Sync>;

fn reject_duplicates(id: i64, existing: Option<&[u8]>, new: &[u8]) -> Result<Option<Vec<u8>>> {
    match existing {
        None => Ok(Some(new.to_vec())),
        Some(_) => Err(MstError::DuplicateId { id }),
    }
}

#[derive(Clone)]
pub struct TreeParams {
    pub degree: Degree,
    pub max_count: i64,
    pub hash_algorithm: HashAlgorithm,
    pub key_prefix: Vec<u8>,
    pub verify_on_load: bool,
    pub report_duplicate_on_put: bool,
    pub duplicate_policy: DuplicatePolicy,
}

impl fmt::Debug for TreeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeParams")
            .field("degree", &self.degree)
            .field("max_count", &self.max_count)
            .field("key_prefix", &hex::encode(&self.key_prefix))
            .field("verify_on_load", &self.verify_on_load)
            .field("report_duplicate_on_put", &self.report_duplicate_on_put)
            .finish()
    }
}

impl TreeParams {
    pub fn new(degree: Degree, hash_algorithm: HashAlgorithm, key_prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            degree,
            max_count: degree.max_count(),
            hash_algorithm,
            key_prefix: key_prefix.into(),
            verify_on_load: false,
            report_duplicate_on_put: false,
            duplicate_policy: Arc::new(reject_duplicates),
        }
    }

    pub fn with_verify_on_load(mut self, verify: bool) -> Self {
        self.verify_on_load = verify;
        self
    }

    pub fn with_report_duplicate_on_put(mut self, report: bool) -> Self {
        self.report_duplicate_on_put = report;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Shrinks `max_count` to `width^max_depth`, e.g. for the scenario
    /// fixtures in spec §8 ("DEGREE=4, MAX_COUNT=4^3=64") and property
    /// tests that want a small id space to iterate quickly. `max_depth`
    /// must not exceed `self.degree`'s table entry.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        more_asserts::debug_assert_le!(max_depth, self.degree.max_depth());
        self.max_count = (self.degree.width() as i64).pow(max_depth);
        self
    }

    pub(crate) fn storage_key(&self, digest_bytes: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.key_prefix.len() + digest_bytes.len());
        key.extend_from_slice(&self.key_prefix);
        key.extend_from_slice(digest_bytes);
        key
    }
}
