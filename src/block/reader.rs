// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Directory, DirectoryEntry, MAGIC};
use crate::compression::CompressionType;
use crate::record::{self, Record};
use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

const TRAILER_LEN: u64 = 8;

/// Reads a `.cidx` file: parses the trailing JSON directory on open, then
/// seeks and decompresses individual blocks on demand (spec §4.5).
pub struct BlockReader {
    file: File,
    compression: CompressionType,
    directory: Directory,
}

impl BlockReader {
    /// Opens `path`, validates the magic header, and parses the directory
    /// footer. `compression` must match the codec the file was built with —
    /// the format stores no compression tag of its own, relying on the
    /// metadata sidecar (spec §4.10) to carry it instead.
    pub fn open(path: impl AsRef<Path>, compression: CompressionType) -> crate::Result<Self> {
        let mut file = File::open(path.as_ref())?;

        let len = file.metadata()?.len();
        if len < MAGIC.len() as u64 + TRAILER_LEN {
            return Err(crate::Error::IndexCorruption("cidx file too short".into()));
        }

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(crate::Error::IndexCorruption("bad cidx magic".into()));
        }

        file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))?;
        let directory_len = file.read_i64::<BigEndian>()? as u64;

        if directory_len > len {
            return Err(crate::Error::IndexCorruption(
                "cidx directory length exceeds file size".into(),
            ));
        }

        file.seek(SeekFrom::End(-(TRAILER_LEN as i64) - directory_len as i64))?;
        let mut json = vec![0u8; directory_len as usize];
        file.read_exact(&mut json)?;

        let directory: Directory = serde_json::from_slice(&json)?;

        Ok(Self {
            file,
            compression,
            directory,
        })
    }

    /// The file's sparse directory, in key order.
    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Reads and decodes the records of a single block named by `meta`.
    pub fn read_block(&mut self, meta: &DirectoryEntry) -> crate::Result<Vec<Record>> {
        self.file.seek(SeekFrom::Start(meta.offset))?;

        let mut compressed = vec![0u8; meta.length as usize];
        self.file.read_exact(&mut compressed)?;

        let raw = self.compression.decompress(&compressed)?;
        record::decode_batch(&mut Cursor::new(raw), meta.record_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::writer::BlockWriter;
    use test_log::test;

    #[test]
    fn rejects_truncated_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.cidx");
        std::fs::write(&path, b"CI")?;

        assert!(BlockReader::open(&path, CompressionType::None).is_err());
        Ok(())
    }

    #[test]
    fn rejects_bad_magic() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.cidx");
        std::fs::write(&path, b"NOPE0000")?;

        assert!(BlockReader::open(&path, CompressionType::None).is_err());
        Ok(())
    }

    #[test]
    fn reads_multiple_blocks_in_order() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.cidx");

        let mut writer = BlockWriter::create(&path, CompressionType::None, 32)?;
        for i in 0..10 {
            writer.write(Record::new(format!("k{i:02}").as_bytes(), i, i))?;
        }
        writer.finish()?;

        let mut reader = BlockReader::open(&path, CompressionType::None)?;
        assert!(reader.directory().blocks.len() > 1);

        let mut all_keys = Vec::new();
        for meta in &reader.directory().blocks.clone() {
            let records = reader.read_block(meta)?;
            all_keys.extend(records.iter().map(|r| r.trimmed_key().to_vec()));
        }

        assert_eq!(10, all_keys.len());
        for i in 0..10 {
            assert_eq!(format!("k{i:02}").into_bytes(), all_keys[i]);
        }

        Ok(())
    }
}
