// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::compression::CompressionType;
use std::path::PathBuf;

/// Target raw byte size of a `.cidx` block before it is compressed and
/// flushed, per spec §4.4 ("~64 KiB").
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1_024;

/// Minimum per-index sort memory budget, per spec §4.8 ("minimum 10 MiB per group").
pub const MIN_INDEX_MEMORY: usize = 10 * 1_024 * 1_024;

/// Engine-wide configuration, builder-style like the teacher's `Config`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Field separator byte. Defaults to `,`.
    pub separator: u8,

    /// Number of scanner worker threads. Defaults to the available parallelism.
    pub worker_count: usize,

    /// Total memory budget (bytes) divided across index groups during a build,
    /// per spec §4.8.
    pub memory_budget: usize,

    /// Target raw block size before compression, per spec §4.4.
    pub block_size: usize,

    /// Compression used for `.cidx` blocks.
    pub compression: CompressionType,

    /// Desired bloom filter false-positive rate. `0.0` disables the bloom filter.
    pub bloom_fp_rate: f32,

    /// Directory used for index build scratch files; defaults to a
    /// subdirectory of the output index directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            separator: b',',
            worker_count: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            memory_budget: 256 * 1_024 * 1_024,
            block_size: DEFAULT_BLOCK_SIZE,
            compression: CompressionType::default(),
            bloom_fp_rate: 0.01,
            temp_dir: None,
        }
    }
}

impl Config {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the field separator byte.
    ///
    /// Defaults to `,`.
    #[must_use]
    pub fn separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Sets the number of scanner worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn worker_count(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_count must be > 0");
        self.worker_count = n;
        self
    }

    /// Sets the total memory budget divided across index groups, per spec §4.8.
    #[must_use]
    pub fn memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Sets the target raw block size before compression.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 0.
    #[must_use]
    pub fn block_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "block_size must be > 0");
        self.block_size = bytes;
        self
    }

    /// Sets the compression method used for `.cidx` blocks.
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the target bloom filter false-positive rate. `0.0` disables the
    /// bloom filter entirely (no `.cidx.bloom` file is written).
    #[must_use]
    pub fn bloom_fp_rate(mut self, fp_rate: f32) -> Self {
        self.bloom_fp_rate = fp_rate;
        self
    }

    /// Overrides the scratch directory used for external-sort spill chunks.
    #[must_use]
    pub fn temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    /// Returns `true` if bloom filters should be built.
    #[must_use]
    pub fn bloom_enabled(&self) -> bool {
        self.bloom_fp_rate > 0.0
    }

    /// Per-index memory budget, divided evenly with a floor of [`MIN_INDEX_MEMORY`],
    /// per spec §4.8.
    #[must_use]
    pub fn per_index_memory(&self, index_count: usize) -> usize {
        if index_count == 0 {
            return self.memory_budget;
        }

        (self.memory_budget / index_count).max(MIN_INDEX_MEMORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn per_index_memory_floor() {
        let config = Config::new().memory_budget(1_024);
        assert_eq!(MIN_INDEX_MEMORY, config.per_index_memory(4));
    }

    #[test]
    fn per_index_memory_split() {
        let config = Config::new().memory_budget(100 * 1_024 * 1_024);
        assert_eq!(25 * 1_024 * 1_024, config.per_index_memory(4));
    }
}
