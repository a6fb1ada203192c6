// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Atomic file writes (spec §3, "Lifecycle": "Index files and metadata are
//! created atomically per build (write to a temp chunk dir, then rename)").

use std::io::Write;
use std::path::Path;

/// Writes `content` to a temp file in `path`'s parent directory, then
/// renames it into place. A reader never observes a partially written file.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path.parent().unwrap_or_else(|| Path::new("."));

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    Ok(())
}

/// Renames `from` to `to`, both assumed to be on the same filesystem (the
/// caller's temp chunk dir and output dir), completing an atomic build.
pub fn rename_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn atomic_rewrite_replaces_content() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("meta.json");
        std::fs::write(&path, b"old")?;

        rewrite_atomic(&path, b"new")?;

        assert_eq!(b"new".to_vec(), std::fs::read(&path)?);
        Ok(())
    }

    #[test]
    fn rename_moves_file() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("a.cidx.tmp");
        let to = dir.path().join("a.cidx");
        std::fs::write(&from, b"data")?;

        rename_into_place(&from, &to)?;

        assert!(!from.exists());
        assert_eq!(b"data".to_vec(), std::fs::read(&to)?);
        Ok(())
    }
}
