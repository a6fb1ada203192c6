// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! External sorter (spec §4.6): bounded-memory chunked sort with spill to
//! disk, followed by a k-way merge through a [`crate::block::BlockWriter`].
//!
//! Unlike the teacher's `Merger`, which merges two directions over a
//! `crossbeam_skiplist` memtable using `interval_heap`, this merge is
//! one-directional over on-disk spill chunks, so a plain
//! [`std::collections::BinaryHeap`] is the right tool (spec §9: "a
//! redesign from the source's unidirectional constraint").

use crate::block::BlockWriter;
use crate::bloom::BloomFilter;
use crate::compression::CompressionType;
use crate::record::{self, Record};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Outcome of a completed sort + merge.
pub struct SortResult {
    pub distinct_count: u64,
    pub record_count: u64,
    pub bloom: Option<BloomFilter>,
}

/// Accepts records in arbitrary order, spills sorted chunks to `temp_dir`,
/// and merges them into `output_path` as a `.cidx` file (spec §4.6).
pub struct ExternalSorter {
    output_path: PathBuf,
    temp_dir: PathBuf,
    chunk_size: usize,
    compression: CompressionType,
    block_size: usize,
    bloom_fp_rate: Option<f32>,

    buffer: Vec<Record>,
    chunk_paths: Vec<PathBuf>,
    next_chunk_id: u64,
    records_added: u64,
}

impl ExternalSorter {
    /// `memory_budget` is the per-index memory budget in bytes (spec §4.8);
    /// chunk size in records is derived from it per spec §4.6.
    pub fn new(
        output_path: PathBuf,
        temp_dir: PathBuf,
        memory_budget: usize,
        compression: CompressionType,
        block_size: usize,
        bloom_fp_rate: Option<f32>,
    ) -> crate::Result<Self> {
        std::fs::create_dir_all(&temp_dir)?;

        let chunk_size = ((memory_budget / 100) / record::RECORD_LEN).max(1000);

        Ok(Self {
            output_path,
            temp_dir,
            chunk_size,
            compression,
            block_size,
            bloom_fp_rate,
            buffer: Vec::new(),
            chunk_paths: Vec::new(),
            next_chunk_id: 0,
            records_added: 0,
        })
    }

    /// Appends a record, spilling a sorted chunk when the buffer fills.
    pub fn add(&mut self, record: Record) -> crate::Result<()> {
        self.buffer.push(record);
        self.records_added += 1;

        if self.buffer.len() >= self.chunk_size {
            self.spill_chunk()?;
        }

        Ok(())
    }

    fn spill_chunk(&mut self) -> crate::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.buffer.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let raw = record::encode_batch(&self.buffer);
        let compressed = self.compression.compress(&raw);

        let path = self.temp_dir.join(format!("chunk-{:08}.bin", self.next_chunk_id));
        std::fs::write(&path, compressed)?;

        self.chunk_paths.push(path);
        self.next_chunk_id += 1;
        self.buffer.clear();

        Ok(())
    }

    /// Flushes the tail chunk, k-way-merges every spilled chunk through a
    /// block writer, and returns the merge's distinct-key count and an
    /// optional populated bloom filter (spec §4.6).
    ///
    /// Spill chunk files are removed before returning, whether this
    /// succeeds, fails, or unwinds via panic (spec §4.6 "Failure": "temp
    /// chunks are deleted on cleanup() regardless").
    pub fn finalize(mut self) -> crate::Result<SortResult> {
        self.spill_chunk()?;
        let _cleanup = ChunkCleanup { paths: &self.chunk_paths };

        let mut writer = BlockWriter::create(&self.output_path, self.compression, self.block_size)?;

        if self.chunk_paths.is_empty() {
            writer.finish()?;
            return Ok(SortResult {
                distinct_count: 0,
                record_count: 0,
                bloom: None,
            });
        }

        let mut cursors: Vec<ChunkCursor> = self
            .chunk_paths
            .iter()
            .map(|path| ChunkCursor::load(path, self.compression))
            .collect::<crate::Result<_>>()?;

        let mut heap = BinaryHeap::new();
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some(record) = cursor.next() {
                heap.push(Reverse(HeapEntry { record, source }));
            }
        }

        let mut bloom = self
            .bloom_fp_rate
            .map(|fp| BloomFilter::with_fp_rate(self.records_added.max(1) as usize, f64::from(fp)));
        let mut distinct_count = 0u64;
        let mut last_key: Option<Vec<u8>> = None;

        while let Some(Reverse(HeapEntry { record, source })) = heap.pop() {
            let key = record.trimmed_key().to_vec();
            if last_key.as_deref() != Some(key.as_slice()) {
                distinct_count += 1;
                if let Some(bloom) = bloom.as_mut() {
                    bloom.insert(&key);
                }
                last_key = Some(key);
            }

            writer.write(record)?;

            if let Some(next) = cursors[source].next() {
                heap.push(Reverse(HeapEntry { record: next, source }));
            }
        }

        writer.finish()?;

        Ok(SortResult {
            distinct_count,
            record_count: self.records_added,
            bloom,
        })
    }
}

struct ChunkCleanup<'a> {
    paths: &'a [PathBuf],
}

impl Drop for ChunkCleanup<'_> {
    fn drop(&mut self) {
        for path in self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A fully-loaded, in-order spill chunk, consumed front-to-back during the
/// merge. Each chunk is already bounded by the per-index memory budget
/// (spec §4.6), so loading it whole is within the same budget the merge
/// as a whole respects.
struct ChunkCursor {
    records: Vec<Record>,
    pos: usize,
}

impl ChunkCursor {
    fn load(path: &Path, compression: CompressionType) -> crate::Result<Self> {
        let compressed = std::fs::read(path)?;
        let raw = compression.decompress(&compressed)?;
        let count = raw.len() / record::RECORD_LEN;
        let records = record::decode_batch(&mut Cursor::new(raw), count)?;
        Ok(Self { records, pos: 0 })
    }

    fn next(&mut self) -> Option<Record> {
        let record = self.records.get(self.pos)?.clone();
        self.pos += 1;
        Some(record)
    }
}

struct HeapEntry {
    record: Record,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.sort_key() == other.record.sort_key()
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record.sort_key().cmp(&other.record.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockReader;
    use test_log::test;

    fn records(pairs: &[(&str, i64, i64)]) -> Vec<Record> {
        pairs.iter().map(|&(k, o, l)| Record::new(k.as_bytes(), o, l)).collect()
    }

    #[test]
    fn merges_spilled_chunks_in_sorted_order() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("dept.cidx");
        let temp = dir.path().join("tmp");

        // Force a 1-record chunk size so every add spills immediately.
        let mut sorter = ExternalSorter::new(output.clone(), temp, 100 * record::RECORD_LEN, CompressionType::None, 64 * 1024, None)?;
        for record in records(&[("c", 2, 3), ("a", 0, 1), ("b", 1, 2)]) {
            sorter.add(record)?;
        }
        let result = sorter.finalize()?;

        assert_eq!(3, result.distinct_count);
        assert_eq!(3, result.record_count);

        let mut reader = BlockReader::open(&output, CompressionType::None)?;
        let directory = reader.directory().clone();
        let mut all = Vec::new();
        for meta in &directory.blocks {
            all.extend(reader.read_block(meta)?);
        }

        let keys: Vec<_> = all.iter().map(|r| r.trimmed_key().to_vec()).collect();
        assert_eq!(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], keys);

        Ok(())
    }

    #[test]
    fn empty_sorter_produces_empty_index() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("empty.cidx");
        let temp = dir.path().join("tmp");

        let sorter = ExternalSorter::new(output.clone(), temp, 1024 * 1024, CompressionType::None, 64 * 1024, None)?;
        let result = sorter.finalize()?;

        assert_eq!(0, result.distinct_count);

        let reader = BlockReader::open(&output, CompressionType::None)?;
        assert!(reader.directory().blocks.is_empty());

        Ok(())
    }

    #[test]
    fn bloom_captures_every_distinct_key() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("dept.cidx");
        let temp = dir.path().join("tmp");

        let mut sorter = ExternalSorter::new(output, temp, 1024 * 1024, CompressionType::None, 64 * 1024, Some(0.01))?;
        for record in records(&[("Eng", 0, 2), ("Sales", 1, 3), ("Eng", 2, 4)]) {
            sorter.add(record)?;
        }
        let result = sorter.finalize()?;

        assert_eq!(2, result.distinct_count);
        let bloom = result.bloom.expect("bloom configured");
        assert!(bloom.might_contain(b"Eng"));
        assert!(bloom.might_contain(b"Sales"));

        Ok(())
    }

    #[test]
    fn spilled_chunk_files_are_removed_after_finalize() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("dept.cidx");
        let temp = dir.path().join("tmp");

        let mut sorter = ExternalSorter::new(output, temp.clone(), record::RECORD_LEN, CompressionType::None, 64 * 1024, None)?;
        for record in records(&[("a", 0, 1), ("b", 1, 2), ("c", 2, 3)]) {
            sorter.add(record)?;
        }
        sorter.finalize()?;

        let remaining: Vec<_> = std::fs::read_dir(&temp)?.collect();
        assert!(remaining.is_empty());

        Ok(())
    }
}
