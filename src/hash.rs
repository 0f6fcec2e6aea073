// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hash function registry (spec §6.2). A [`Digest`] is self-describing: it
//! carries the algorithm tag alongside the raw hash bytes, so mixing
//! algorithms under one root is detectable rather than silently wrong.

use bytes::Bytes;
use sha2::Sha256;
use sha3::{Digest as _, Sha3_256};
use std::fmt;

/// Algorithms a tree may be parameterized over. All nodes under one root
/// must share the algorithm of the root's digest (spec §6.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum HashAlgorithm {
    Sha256 = 1,
    Sha3_256 = 2,
}

impl HashAlgorithm {
    pub(crate) fn tag(self) -> u8 {
        self as u8
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(HashAlgorithm::Sha256),
            2 => Some(HashAlgorithm::Sha3_256),
            _ => None,
        }
    }

    /// Raw digest length in bytes for this algorithm, excluding the tag byte.
    pub fn raw_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha3_256 => 32,
        }
    }

    fn raw_hash(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => {
                use sha2::Digest as _;
                Sha256::digest(bytes).to_vec()
            }
            HashAlgorithm::Sha3_256 => Sha3_256::digest(bytes).to_vec(),
        }
    }

    /// `hash(bytes) -> digest`, deterministic, fixed-length per algorithm.
    pub fn hash(self, bytes: &[u8]) -> Digest {
        let raw = self.raw_hash(bytes);
        let mut buf = Vec::with_capacity(1 + raw.len());
        buf.push(self.tag());
        buf.extend_from_slice(&raw);
        Digest(Bytes::from(buf))
    }

    /// `verify(digest, bytes) -> bool`: re-hashes and compares.
    pub fn verify(self, digest: &Digest, bytes: &[u8]) -> bool {
        self.hash(bytes) == *digest
    }
}

/// A self-describing digest: `algorithm-tag ‖ raw-hash`.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Digest(Bytes);

impl Digest {
    /// Reconstructs a digest from its wire bytes (tag ‖ raw hash), validating
    /// that the tag names a known algorithm and the length matches.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&tag, raw) = bytes.split_first()?;
        let algorithm = HashAlgorithm::from_tag(tag)?;
        if raw.len() != algorithm.raw_len() {
            return None;
        }
        Some(Digest(Bytes::copy_from_slice(bytes)))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        // Constructed only via `from_bytes`/`HashAlgorithm::hash`, both of which validate the tag.
        HashAlgorithm::from_tag(self.0[0]).expect("digest always carries a known algorithm tag")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.as_bytes()))
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
