// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{record_raw_size, Directory, DirectoryEntry, MAGIC};
use crate::compression::CompressionType;
use crate::record::{self, Record};
use byteorder::{BigEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Buffers records into ~[`crate::config::DEFAULT_BLOCK_SIZE`]-sized blocks,
/// compresses and appends each one, and writes the trailing JSON directory
/// on [`BlockWriter::finish`] (spec §4.4).
pub struct BlockWriter {
    file: BufWriter<File>,
    compression: CompressionType,
    block_size: usize,
    buffer: Vec<Record>,
    buffer_raw_bytes: usize,
    directory: Vec<DirectoryEntry>,
    file_pos: u64,
}

impl BlockWriter {
    /// Creates `path`, writes the magic header, and returns a writer ready
    /// to accept records in ascending sort-key order.
    pub fn create(path: impl AsRef<Path>, compression: CompressionType, block_size: usize) -> crate::Result<Self> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(MAGIC)?;

        Ok(Self {
            file,
            compression,
            block_size,
            buffer: Vec::new(),
            buffer_raw_bytes: 0,
            directory: Vec::new(),
            file_pos: MAGIC.len() as u64,
        })
    }

    /// Appends a record. Records must arrive in ascending sort-key order
    /// (spec §4.6): the writer does not sort or validate this itself.
    pub fn write(&mut self, record: Record) -> crate::Result<()> {
        self.buffer_raw_bytes += record_raw_size(&record);
        self.buffer.push(record);

        if self.buffer_raw_bytes >= self.block_size {
            self.flush()?;
        }

        Ok(())
    }

    /// Flushes any buffered records as one compressed block and directory entry.
    pub fn flush(&mut self) -> crate::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let start_key = String::from_utf8_lossy(self.buffer[0].trimmed_key()).into_owned();
        let is_distinct = self
            .buffer
            .iter()
            .all(|r| r.trimmed_key() == self.buffer[0].trimmed_key());
        let record_count = self.buffer.len();

        let raw = record::encode_batch(&self.buffer);
        let compressed = self.compression.compress(&raw);

        self.file.write_all(&compressed)?;

        self.directory.push(DirectoryEntry {
            start_key,
            offset: self.file_pos,
            length: compressed.len() as u32,
            record_count,
            is_distinct,
        });

        self.file_pos += compressed.len() as u64;
        self.buffer.clear();
        self.buffer_raw_bytes = 0;

        Ok(())
    }

    /// Flushes any remainder, writes the JSON directory and its length
    /// trailer, and syncs the file to disk.
    pub fn finish(mut self) -> crate::Result<Directory> {
        self.flush()?;

        let directory = Directory {
            blocks: self.directory,
        };
        let json = serde_json::to_vec(&directory)?;

        self.file.write_all(&json)?;
        self.file.write_i64::<BigEndian>(json.len() as i64)?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        Ok(directory)
    }
}
