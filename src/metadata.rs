// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CSV fingerprint and metadata sidecar (spec §3, §4.8, §6).

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Width of each sampled window used to build a CSV fingerprint (spec §4.8).
pub const SAMPLE_WINDOW: u64 = 512 * 1_024;

/// Per-index stats recorded in the metadata sidecar (spec §6).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    #[serde(rename = "distinctCount")]
    pub distinct_count: u64,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
}

/// The `<csv>_meta.json` sidecar (spec §3, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "capturedAt")]
    pub captured_at: String,
    #[serde(rename = "totalRows")]
    pub total_rows: u64,
    #[serde(rename = "csvSize")]
    pub csv_size: u64,
    #[serde(rename = "csvMtime")]
    pub csv_mtime: i64,
    #[serde(rename = "csvHash")]
    pub csv_hash: String,
    pub indexes: BTreeMap<String, IndexStats>,
}

impl Metadata {
    /// Writes the sidecar atomically (spec §3 Lifecycle).
    pub fn write_to_file(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        crate::file::rewrite_atomic(path, &json)?;
        Ok(())
    }

    /// Reads a previously written sidecar.
    pub fn read_from_file(path: &Path) -> crate::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns `true` if `csv_path`'s current fingerprint no longer matches
    /// the one recorded at build time (query-time staleness check,
    /// supplementing spec §4.8's build-time fingerprint with a read-side
    /// use for it).
    pub fn is_stale(&self, csv_path: &Path) -> crate::Result<bool> {
        let (size, mtime, hash) = fingerprint(csv_path)?;
        Ok(size != self.csv_size || mtime != self.csv_mtime || hash != self.csv_hash)
    }
}

/// Computes `(size, mtime_seconds, hex_sha1)` over three 512 KiB windows of
/// `path` — offset 0, the middle, and `max(0, size - 512KiB)` — per spec
/// §4.8 step 7. Windows are hashed in that fixed order even when they
/// overlap on small files, so the fingerprint is deterministic for any size.
pub fn fingerprint(path: &Path) -> crate::Result<(u64, i64, String)> {
    let mut file = File::open(path)?;
    let meta = file.metadata()?;
    let size = meta.len();
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let mut hasher = Sha1::new();
    for &offset in &sample_offsets(size) {
        file.seek(SeekFrom::Start(offset))?;
        let window_len = SAMPLE_WINDOW.min(size - offset) as usize;
        let mut buf = vec![0u8; window_len];
        file.read_exact(&mut buf)?;
        hasher.update(&buf);
    }

    Ok((size, mtime, to_hex(&hasher.finalize())))
}

fn sample_offsets(size: u64) -> [u64; 3] {
    if size == 0 {
        return [0, 0, 0];
    }
    [0, size / 2, size.saturating_sub(SAMPLE_WINDOW)]
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn fingerprint_is_deterministic_for_same_content() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.csv");
        std::fs::write(&path, b"id,name\n1,Alice\n2,Bob\n")?;

        let a = fingerprint(&path)?;
        let b = fingerprint(&path)?;
        assert_eq!(a, b);

        Ok(())
    }

    #[test]
    fn fingerprint_changes_with_content() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.csv");

        std::fs::write(&path, b"id,name\n1,Alice\n")?;
        let (size_a, _, hash_a) = fingerprint(&path)?;

        std::fs::write(&path, b"id,name\n1,Alice\n2,Bob\n")?;
        let (size_b, _, hash_b) = fingerprint(&path)?;

        assert_ne!(size_a, size_b);
        assert_ne!(hash_a, hash_b);

        Ok(())
    }

    #[test]
    fn sidecar_round_trip_and_staleness() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = dir.path().join("data.csv");
        std::fs::write(&csv_path, b"id,name\n1,Alice\n")?;

        let (size, mtime, hash) = fingerprint(&csv_path)?;
        let mut indexes = BTreeMap::new();
        indexes.insert("dept".to_string(), IndexStats { distinct_count: 2, file_size: 128 });

        let metadata = Metadata {
            captured_at: "2026-01-01T00:00:00Z".to_string(),
            total_rows: 1,
            csv_size: size,
            csv_mtime: mtime,
            csv_hash: hash,
            indexes,
        };

        let sidecar_path = dir.path().join("data_meta.json");
        metadata.write_to_file(&sidecar_path)?;
        let loaded = Metadata::read_from_file(&sidecar_path)?;

        assert!(!loaded.is_stale(&csv_path)?);

        std::fs::write(&csv_path, b"id,name\n1,Alice\n2,Bob\n")?;
        assert!(loaded.is_stale(&csv_path)?);

        Ok(())
    }
}
