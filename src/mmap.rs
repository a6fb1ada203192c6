// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Mapped-file reader (spec §4, "Mapped-file reader").
//!
//! Opens a file, maps it read-only, and exposes a `D[0..N)` byte span.
//! The mapping is released deterministically when [`MappedFile`] is dropped,
//! per spec §3 ("Lifecycle").

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// A read-only memory-mapped file.
///
/// Header BOM handling (spec §3: "optional UTF-8 BOM `EF BB BF` at position 0
/// stripped from header only") is exposed via [`MappedFile::data`], which is
/// always the *full* file; callers that need the BOM-stripped header slice
/// use [`MappedFile::header_start`].
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    /// Opens `path`, maps it read-only, and returns the mapping.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be opened or mapped,
    /// or [`crate::Error::EmptyFile`] if the file has zero length.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let file = File::open(path.as_ref())?;
        let metadata = file.metadata()?;

        if metadata.len() == 0 {
            return Err(crate::Error::EmptyFile);
        }

        // SAFETY: the mapping is read-only for the engine's whole lifetime; the
        // caller is responsible for not mutating the backing file concurrently,
        // which matches spec §3 ("The CSV is read-only to the core").
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        log::debug!(
            "mapped {} ({} bytes)",
            path.as_ref().display(),
            mmap.len()
        );

        Ok(Self { mmap })
    }

    /// The full mapped byte span `D[0..N)`.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Length of the mapped file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns `true` if the mapped file is empty (never actually constructed
    /// this way — [`Self::open`] rejects empty files — but kept for API parity).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Byte offset of the first byte after the header newline, accounting for
    /// an optional UTF-8 BOM at position 0 (spec §3).
    ///
    /// Returns `None` if there is no newline in the file (header-only file
    /// with no trailing `\n`, which spec §8 allows: "Empty CSV (header
    /// only)").
    #[must_use]
    pub fn header_end(&self) -> Option<usize> {
        let data = self.data();
        let start = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
            3
        } else {
            0
        };

        data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| start + i + 1)
    }

    /// The header line with the BOM (if any) stripped and the trailing
    /// newline (and optional `\r`) removed.
    #[must_use]
    pub fn header_line(&self) -> &[u8] {
        let data = self.data();
        let start = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
            3
        } else {
            0
        };

        let end = self.header_end().unwrap_or(data.len());
        let mut line = &data[start..end];
        line = line.strip_suffix(b"\n").unwrap_or(line);
        line = line.strip_suffix(b"\r").unwrap_or(line);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn open_empty_file_errors() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.csv");
        File::create(&path)?;

        assert!(matches!(MappedFile::open(&path), Err(crate::Error::EmptyFile)));

        Ok(())
    }

    #[test]
    fn header_end_and_line() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.csv");
        let mut file = File::create(&path)?;
        file.write_all(b"id,name\n1,Alice\n")?;
        drop(file);

        let mapped = MappedFile::open(&path)?;
        assert_eq!(b"id,name", mapped.header_line());
        assert_eq!(Some(8), mapped.header_end());

        Ok(())
    }

    #[test]
    fn bom_is_stripped_from_header() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bom.csv");
        let mut file = File::create(&path)?;
        file.write_all(b"\xEF\xBB\xBFid,name\n1,Alice\n")?;
        drop(file);

        let mapped = MappedFile::open(&path)?;
        assert_eq!(b"id,name", mapped.header_line());

        Ok(())
    }
}
