// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Index manager: orchestrates scan → per-index fan-out → sorter → index
//! file + bloom + metadata sidecar (spec §4.8).
//!
//! The scanner fan-out is the batched producer-consumer redesign called
//! for in spec §9: each scanner worker accumulates up to 1000 records per
//! index group in a per-worker buffer, then sends a batch through a
//! bounded `crossbeam_channel` (capacity 100) to that group's dedicated
//! sorter thread. Back-pressure from a full channel throttles the scan
//! when a sorter falls behind.

use crate::config::Config;
use crate::csv_row;
use crate::file;
use crate::metadata::{self, IndexStats, Metadata};
use crate::mmap::MappedFile;
use crate::record::Record;
use crate::scanner::{self, RowHandler};
use crate::sorter::{ExternalSorter, SortResult};
use crossbeam_channel::{bounded, Sender};
use serde_json::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One resolved index group: its on-disk name and the header column
/// indices that make up its key.
struct ResolvedGroup {
    name: String,
    column_indices: Vec<usize>,
}

/// Parses the column specification (spec §4.8 step 1): a JSON array whose
/// elements are either a column name (singleton index) or an array of
/// names (composite index). Composite column names are sorted
/// alphabetically so the on-disk key order matches the query planner's
/// sorted equality-map order (spec §4.10).
fn parse_column_spec(value: &Value) -> crate::Result<Vec<Vec<String>>> {
    let items = value
        .as_array()
        .ok_or_else(|| crate::Error::BadRequest("column spec must be a JSON array".into()))?;

    items
        .iter()
        .map(|item| match item {
            Value::String(col) => Ok(vec![col.to_lowercase()]),
            Value::Array(cols) => {
                let mut names = cols
                    .iter()
                    .map(|c| {
                        c.as_str()
                            .map(str::to_lowercase)
                            .ok_or_else(|| crate::Error::BadRequest("composite column must be a string".into()))
                    })
                    .collect::<crate::Result<Vec<_>>>()?;
                names.sort();
                Ok(names)
            }
            _ => Err(crate::Error::BadRequest("column spec element must be a string or array".into())),
        })
        .collect()
}

/// Index file stem for a group: the column name for a singleton, or
/// underscore-joined sorted names for a composite (spec §4.10).
fn group_name(columns: &[String]) -> String {
    columns.join("_")
}

fn resolve_groups(specs: &[Vec<String>], header_index: &FxHashMap<String, usize>) -> crate::Result<Vec<ResolvedGroup>> {
    specs
        .iter()
        .map(|columns| {
            let column_indices = columns
                .iter()
                .map(|col| {
                    header_index
                        .get(col)
                        .copied()
                        .ok_or_else(|| crate::Error::SchemaMismatch { column: col.clone() })
                })
                .collect::<crate::Result<Vec<_>>>()?;

            Ok(ResolvedGroup {
                name: group_name(columns),
                column_indices,
            })
        })
        .collect()
}

fn header_column_index(mapped: &MappedFile, separator: u8) -> FxHashMap<String, usize> {
    let fields = csv_row::split_fields(mapped.header_line(), separator);
    fields
        .iter()
        .enumerate()
        .map(|(i, name)| (String::from_utf8_lossy(name).trim().to_lowercase(), i))
        .collect()
}

struct FanOutHandler {
    senders: Vec<Sender<Vec<Record>>>,
    buffers: Vec<Mutex<Vec<Vec<Record>>>>,
}

const BATCH_SIZE: usize = 1000;

impl FanOutHandler {
    fn new(worker_count: usize, group_count: usize, senders: Vec<Sender<Vec<Record>>>) -> Self {
        let buffers = (0..worker_count.max(1))
            .map(|_| Mutex::new(vec![Vec::new(); group_count]))
            .collect();
        Self { senders, buffers }
    }

    /// Flushes every worker's remaining buffers and drops the senders,
    /// which closes each sorter's channel and lets its consumer thread exit.
    fn finish(self) -> crate::Result<()> {
        for worker_mutex in &self.buffers {
            let mut worker_buffers = worker_mutex.lock().expect("fan-out buffer lock");
            for (group_idx, buf) in worker_buffers.iter_mut().enumerate() {
                if !buf.is_empty() {
                    let batch = std::mem::take(buf);
                    self.senders[group_idx]
                        .send(batch)
                        .map_err(|_| crate::Error::IndexCorruption("sorter channel closed early".into()))?;
                }
            }
        }
        Ok(())
    }
}

impl RowHandler for FanOutHandler {
    fn handle(&self, worker_id: usize, keys: &[Vec<u8>], offset: i64, line: i64) {
        let mut worker_buffers = self.buffers[worker_id].lock().expect("fan-out buffer lock");
        for (group_idx, key) in keys.iter().enumerate() {
            let record = Record::new(key, offset, line);
            let buf = &mut worker_buffers[group_idx];
            buf.push(record);

            if buf.len() >= BATCH_SIZE {
                let batch = std::mem::take(buf);
                // A closed receiver only happens if that sorter thread
                // already failed; propagating here would need a second
                // channel, so the dropped batch surfaces instead as a
                // record-count mismatch the sorter thread's join reports.
                let _ = self.senders[group_idx].send(batch);
            }
        }
    }
}

/// Builds one `.cidx` (plus optional `.cidx.bloom`) file per index group
/// and a metadata sidecar, all written atomically into `index_dir`
/// (spec §4.8).
pub fn build(csv_path: &Path, index_dir: &Path, column_spec: &Value, config: &Config) -> crate::Result<Metadata> {
    let specs = parse_column_spec(column_spec)?;

    std::fs::create_dir_all(index_dir)?;
    let temp_parent = config.temp_dir.clone().unwrap_or_else(|| index_dir.to_path_buf());
    std::fs::create_dir_all(&temp_parent)?;
    let build_temp = tempfile::Builder::new().prefix("cidx-build-").tempdir_in(&temp_parent)?;

    let mapped = MappedFile::open(csv_path)?;
    let header_index = header_column_index(&mapped, config.separator);
    let groups = resolve_groups(&specs, &header_index)?;

    let memory_per_index = config.per_index_memory(groups.len());
    let csv_stem = csv_path
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("index")
        .to_string();

    let mut senders = Vec::with_capacity(groups.len());
    let mut handles = Vec::with_capacity(groups.len());
    let mut tmp_outputs = Vec::with_capacity(groups.len());

    for group in &groups {
        let (tx, rx) = bounded::<Vec<Record>>(100);
        let output_tmp = build_temp.path().join(format!("{}.cidx.tmp", group.name));
        let sorter_temp = build_temp.path().join(format!("{}-chunks", group.name));
        let bloom_fp = config.bloom_enabled().then_some(config.bloom_fp_rate);
        let compression = config.compression;
        let block_size = config.block_size;
        let output_for_thread = output_tmp.clone();

        let handle = std::thread::spawn(move || -> crate::Result<SortResult> {
            let mut sorter = ExternalSorter::new(output_for_thread, sorter_temp, memory_per_index, compression, block_size, bloom_fp)?;
            for batch in rx {
                for record in batch {
                    sorter.add(record)?;
                }
            }
            sorter.finalize()
        });

        senders.push(tx);
        handles.push(handle);
        tmp_outputs.push(output_tmp);
    }

    let scanner_groups: Vec<scanner::IndexGroup> = groups
        .iter()
        .map(|g| scanner::IndexGroup { columns: g.column_indices.clone() })
        .collect();

    let fan_out = FanOutHandler::new(config.worker_count, groups.len(), senders);
    let stats = scanner::scan(&mapped, config.separator, config.worker_count, &scanner_groups, &fan_out)?;
    fan_out.finish()?;

    let mut index_stats = BTreeMap::new();
    for ((group, handle), output_tmp) in groups.iter().zip(handles).zip(tmp_outputs) {
        let result = handle
            .join()
            .map_err(|_| crate::Error::IndexCorruption(format!("sorter thread for {} panicked", group.name)))??;

        let final_path = index_dir.join(format!("{csv_stem}_{}.cidx", group.name));
        file::rename_into_place(&output_tmp, &final_path)?;
        let file_size = std::fs::metadata(&final_path)?.len();

        if let Some(bloom) = result.bloom.filter(|_| result.distinct_count > 0) {
            let bloom_path = index_dir.join(format!("{csv_stem}_{}.cidx.bloom", group.name));
            bloom.write_to_file(&bloom_path)?;
        }

        index_stats.insert(
            group.name.clone(),
            IndexStats {
                distinct_count: result.distinct_count,
                file_size,
            },
        );
    }

    let (csv_size, csv_mtime, csv_hash) = metadata::fingerprint(csv_path)?;
    let meta = Metadata {
        captured_at: chrono::Utc::now().to_rfc3339(),
        total_rows: stats.rows_scanned,
        csv_size,
        csv_mtime,
        csv_hash,
        indexes: index_stats,
    };

    meta.write_to_file(&index_dir.join(format!("{csv_stem}_meta.json")))?;

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockReader;
    use serde_json::json;
    use test_log::test;

    fn write_csv(dir: &Path, contents: &[u8]) -> PathBuf {
        let path = dir.join("data.csv");
        std::fs::write(&path, contents).expect("write csv");
        path
    }

    #[test]
    fn builds_singleton_index() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,name,dept\n1,Alice,Eng\n2,Bob,Sales\n3,Carol,Eng\n4,Dave,Eng\n");
        let index_dir = dir.path().join("indexes");

        let config = Config::new();
        let meta = build(&csv_path, &index_dir, &json!(["dept"]), &config)?;

        assert_eq!(4, meta.total_rows);
        let stats = meta.indexes.get("dept").expect("dept index stats");
        assert_eq!(2, stats.distinct_count);

        let mut reader = BlockReader::open(&index_dir.join("data_dept.cidx"), config.compression)?;
        let directory = reader.directory().clone();
        let mut all = Vec::new();
        for block in &directory.blocks {
            all.extend(reader.read_block(block)?);
        }
        assert_eq!(4, all.len());

        Ok(())
    }

    #[test]
    fn composite_index_uses_sorted_column_order() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,name,dept\n1,Alice,Eng\n2,Bob,Sales\n3,Carol,Eng\n");
        let index_dir = dir.path().join("indexes");

        let config = Config::new();
        build(&csv_path, &index_dir, &json!([["name", "dept"]]), &config)?;

        assert!(index_dir.join("data_dept_name.cidx").exists());

        Ok(())
    }

    #[test]
    fn unknown_column_is_schema_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = write_csv(dir.path(), b"id,name\n1,Alice\n");
        let index_dir = dir.path().join("indexes");

        let err = build(&csv_path, &index_dir, &serde_json::json!(["nope"]), &Config::new()).unwrap_err();
        assert!(matches!(err, crate::Error::SchemaMismatch { .. }));
    }

    #[test]
    fn empty_csv_builds_zero_record_index() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,name,dept\n");
        let index_dir = dir.path().join("indexes");

        let meta = build(&csv_path, &index_dir, &json!(["dept"]), &Config::new())?;
        assert_eq!(0, meta.total_rows);
        assert_eq!(0, meta.indexes.get("dept").expect("stats").distinct_count);

        Ok(())
    }
}
