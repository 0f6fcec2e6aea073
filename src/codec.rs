// Copyright (c) JD Chain Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stable binary codec for [`IndexEntry`], the persisted form of every
//! non-leaf *and* leaf-layer position in the tree (spec §6.3). Field order
//! is fixed; child arrays are always written in slot order including nil
//! slots, so two trees holding the same populated ids serialize identically
//! (spec §4.4).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::{MstError, Result};
use crate::hash::Digest;

/// Tags the start of an encoded [`IndexEntry`] so it can be told apart from
/// raw leaf payload bytes, which carry no schema code at all.
const INDEX_ENTRY_SCHEMA: u8 = 0x01;

/// Every non-leaf position in the tree; also the persisted form of a
/// leaf-layer entry, whose `child_hashes` point at raw value bytes instead
/// of nested entries (spec §3.2).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    /// The smallest id coverable under this subtree.
    pub offset: i64,
    /// The id span of each of the `DEGREE` child slots.
    pub step: i64,
    /// How many populated data ids live under each child (0 if empty).
    pub child_counts: Vec<i64>,
    /// Content hash of each child (`None` if that slot has never been populated).
    pub child_hashes: Vec<Option<Digest>>,
}

impl IndexEntry {
    pub fn degree(&self) -> usize {
        self.child_counts.len()
    }

    pub fn new_empty(offset: i64, step: i64, degree: usize) -> Self {
        Self {
            offset,
            step,
            child_counts: vec![0; degree],
            child_hashes: vec![None; degree],
        }
    }

    pub fn total_count(&self) -> i64 {
        self.child_counts.iter().sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(INDEX_ENTRY_SCHEMA);
        out.write_i64::<LittleEndian>(self.offset).expect("write to Vec never fails");
        out.write_i64::<LittleEndian>(self.step).expect("write to Vec never fails");

        out.write_i32::<LittleEndian>(self.child_counts.len() as i32)
            .expect("write to Vec never fails");
        for count in &self.child_counts {
            out.write_i64::<LittleEndian>(*count).expect("write to Vec never fails");
        }

        out.write_i32::<LittleEndian>(self.child_hashes.len() as i32)
            .expect("write to Vec never fails");
        for hash in &self.child_hashes {
            match hash {
                Some(digest) => {
                    let bytes = digest.as_bytes();
                    out.write_i32::<LittleEndian>(bytes.len() as i32)
                        .expect("write to Vec never fails");
                    out.extend_from_slice(bytes);
                }
                None => {
                    out.write_i32::<LittleEndian>(0).expect("write to Vec never fails");
                }
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);
        let schema = reader
            .read_u8()
            .map_err(|e| MstError::Codec(format!("missing schema byte: {e}")))?;
        if schema != INDEX_ENTRY_SCHEMA {
            return Err(MstError::Codec(format!(
                "unknown IndexEntry schema byte {schema}"
            )));
        }

        let offset = reader
            .read_i64::<LittleEndian>()
            .map_err(|e| MstError::Codec(format!("offset: {e}")))?;
        let step = reader
            .read_i64::<LittleEndian>()
            .map_err(|e| MstError::Codec(format!("step: {e}")))?;

        let counts_len = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| MstError::Codec(format!("child_counts length: {e}")))?;
        if counts_len < 0 {
            return Err(MstError::Codec("negative child_counts length".into()));
        }
        let mut child_counts = Vec::with_capacity(counts_len as usize);
        for _ in 0..counts_len {
            child_counts.push(
                reader
                    .read_i64::<LittleEndian>()
                    .map_err(|e| MstError::Codec(format!("child_counts entry: {e}")))?,
            );
        }

        let hashes_len = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| MstError::Codec(format!("child_hashes length: {e}")))?;
        if hashes_len < 0 {
            return Err(MstError::Codec("negative child_hashes length".into()));
        }
        let mut child_hashes = Vec::with_capacity(hashes_len as usize);
        for _ in 0..hashes_len {
            let len = reader
                .read_i32::<LittleEndian>()
                .map_err(|e| MstError::Codec(format!("child_hash length: {e}")))?;
            if len < 0 {
                return Err(MstError::Codec("negative digest length".into()));
            }
            if len == 0 {
                child_hashes.push(None);
                continue;
            }
            let mut buf = vec![0u8; len as usize];
            reader
                .read_exact(&mut buf)
                .map_err(|e| MstError::Codec(format!("child_hash bytes: {e}")))?;
            let digest = Digest::from_bytes(&buf)
                .ok_or_else(|| MstError::Codec("child hash has an unrecognized digest tag".into()))?;
            child_hashes.push(Some(digest));
        }

        if counts_len as usize != hashes_len as usize {
            return Err(MstError::Codec(format!(
                "child_counts length {counts_len} does not match child_hashes length {hashes_len}"
            )));
        }

        Ok(IndexEntry {
            offset,
            step,
            child_counts,
            child_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    #[test]
    fn round_trips_empty_entry() {
        let entry = IndexEntry::new_empty(0, 16, 4);
        let encoded = entry.encode();
        let decoded = IndexEntry::decode(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn round_trips_populated_entry() {
        let mut entry = IndexEntry::new_empty(64, 16, 4);
        entry.child_counts[1] = 3;
        entry.child_hashes[1] = Some(HashAlgorithm::Sha256.hash(b"child"));
        entry.child_counts[3] = 1;
        entry.child_hashes[3] = Some(HashAlgorithm::Sha3_256.hash(b"other"));

        let encoded = entry.encode();
        let decoded = IndexEntry::decode(&encoded).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn rejects_unknown_schema_byte() {
        let bytes = vec![0xffu8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(IndexEntry::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let entry = IndexEntry::new_empty(0, 16, 4);
        let encoded = entry.encode();
        assert!(IndexEntry::decode(&encoded[..encoded.len() - 2]).is_err());
    }
}
