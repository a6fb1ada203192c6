// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `.cidx` block file format (spec §3, §4.4, §4.5).
//!
//! A `.cidx` file is a `"CIDX"` magic header followed by a sequence of
//! compressed record blocks, a JSON directory describing where each block
//! lives, and an 8-byte big-endian trailer giving the directory's length:
//!
//! ```text
//! "CIDX"                          4 bytes
//! <compressed block>*
//! <JSON directory>
//! <directory length as i64 BE>    8 bytes
//! ```
//!
//! Unlike the teacher's segment format, blocks carry no per-block header —
//! the directory entry is the only source of truth for a block's offset and
//! length, since the whole file is rebuilt from scratch on every index build.

pub mod reader;
pub mod writer;

use crate::record::Record;
use serde::{Deserialize, Serialize};

pub use reader::BlockReader;
pub use writer::BlockWriter;

/// File magic at the start of every `.cidx` file.
pub const MAGIC: &[u8; 4] = b"CIDX";

/// One entry in a `.cidx` directory, describing a single compressed block.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// The trimmed key of the first record in the block (spec §4.4).
    #[serde(rename = "startKey")]
    pub start_key: String,

    /// Byte offset of the compressed block within the file.
    pub offset: u64,

    /// Length in bytes of the compressed block.
    pub length: u32,

    /// Number of records packed into the block.
    #[serde(rename = "recordCount")]
    pub record_count: usize,

    /// `true` if every record in the block shares `start_key`, letting the
    /// planner short-circuit a `CoveredIndex` scan early (spec §4.9).
    #[serde(rename = "isDistinct")]
    pub is_distinct: bool,
}

/// The sparse directory of a `.cidx` file: one entry per block, in key order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Directory {
    pub blocks: Vec<DirectoryEntry>,
}

impl Directory {
    /// Index of the first block whose `start_key` is `> key`, i.e. the
    /// partition point for "blocks that could contain `key`" (spec §4.9,
    /// binary search step). Blocks before this index are candidates;
    /// blocks at or after it cannot contain `key` or anything smaller.
    #[must_use]
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        self.blocks.partition_point(|entry| entry.start_key.as_bytes() <= key)
    }

    /// Index of the block that should be the scan's starting point for
    /// `key`: the last block whose `start_key < key`, or `0` if no block's
    /// `start_key` is smaller. Backing up to the last *strictly smaller*
    /// `start_key` (rather than the last `start_key <= key`) is required so
    /// the forward scan also picks up earlier blocks that share `start_key`
    /// with `key`, or whose tail holds records equal to `key` even though
    /// the block's own `start_key` is smaller (spec §4.10, §8 invariant 3).
    #[must_use]
    pub fn starting_block(&self, key: &[u8]) -> usize {
        self.blocks
            .partition_point(|entry| entry.start_key.as_bytes() < key)
            .saturating_sub(1)
    }
}

/// Estimated on-disk contribution of a single record to a block's raw size,
/// per spec §4.4 ("key length + 16 per record") — counted against the
/// record's semantic (trimmed) key length rather than the fixed 80-byte
/// encoding, since the threshold models pre-compression content size.
#[must_use]
pub fn record_raw_size(record: &Record) -> usize {
    record.trimmed_key().len() + 16
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn entry(start_key: &str) -> DirectoryEntry {
        DirectoryEntry {
            start_key: start_key.to_string(),
            offset: 0,
            length: 0,
            record_count: 1,
            is_distinct: false,
        }
    }

    #[test]
    fn starting_block_backs_up_across_duplicate_start_keys() {
        // Three blocks all start with "b": a search for "b" must start at
        // the first of them, not the last, or the earlier two blocks' "b"
        // records are silently skipped.
        let directory = Directory {
            blocks: vec![entry("a"), entry("b"), entry("b"), entry("b"), entry("c")],
        };
        assert_eq!(1, directory.starting_block(b"b"));
    }

    #[test]
    fn starting_block_backs_up_when_key_straddles_a_block_boundary() {
        // Block 1 starts at "b" but its tail may still hold "b" records;
        // a search for "b" must include block 1, not skip straight to it
        // based on a later block's start_key also being "b".
        let directory = Directory {
            blocks: vec![entry("a"), entry("b"), entry("c")],
        };
        assert_eq!(1, directory.starting_block(b"b"));
    }

    #[test]
    fn starting_block_is_zero_when_key_is_smaller_than_every_block() {
        let directory = Directory {
            blocks: vec![entry("b"), entry("c")],
        };
        assert_eq!(0, directory.starting_block(b"a"));
    }

    #[test]
    fn starting_block_picks_last_block_for_a_key_past_the_end() {
        let directory = Directory {
            blocks: vec![entry("a"), entry("b"), entry("c")],
        };
        assert_eq!(2, directory.starting_block(b"z"));
    }
}
