// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Query execution (spec §4.10 "Strategies", "Row materialization",
//! "Output encoding").

use super::planner::{self, Strategy};
use super::QueryConfig;
use crate::aggregator::{self, AggFunc, Aggregator};
use crate::block::BlockReader;
use crate::bloom::MappedBloomFilter;
use crate::condition::{self, Condition};
use crate::csv_row;
use crate::mmap::MappedFile;
use crate::overrides::Overrides;
use crate::record::{trim_trailing_zeros, Record};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Executes `query`, streaming results to `writer` (spec §4.10 "Output
/// encoding"). When `query.explain` is set, only the chosen plan is
/// written, as JSON, and nothing is executed.
pub fn execute(query: &QueryConfig, writer: &mut impl Write) -> crate::Result<()> {
    let index_dir = query.index_dir.clone().unwrap_or_else(|| super::default_index_dir(&query.csv_path));
    let csv_stem = super::csv_stem(&query.csv_path);

    let condition = condition::parse(query.where_clause.as_ref().unwrap_or(&serde_json::Value::Null))?;

    let overrides_path = query
        .csv_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{csv_stem}_updates.json"));
    let overrides = Overrides::load(&overrides_path)?.unwrap_or_default();

    let plan = planner::choose(
        &index_dir,
        &query.csv_path,
        condition.as_ref(),
        query.group_by.as_deref(),
        query.count_only,
        !overrides.is_empty(),
    );

    if query.explain {
        serde_json::to_writer(writer, &plan.explain)?;
        return Ok(());
    }

    match plan.strategy {
        Strategy::CountAll => run_count_all(query, &index_dir, &csv_stem, writer),
        Strategy::FullScan => run_full_scan(query, condition.as_ref(), &overrides, writer),
        Strategy::IndexedScan { index_path, search_key, covered } => {
            match run_indexed_scan(query, &index_path, &search_key, covered, condition.as_ref(), writer) {
                Ok(()) => Ok(()),
                Err(e) => {
                    log::warn!("index open failed for {}: {e}, falling back to full scan", index_path.display());
                    run_full_scan(query, condition.as_ref(), &overrides, writer)
                }
            }
        }
        Strategy::GroupByIndex { index_path } => match run_group_by_index(query, &index_path, writer) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("index open failed for {}: {e}, falling back to full scan", index_path.display());
                run_full_scan(query, condition.as_ref(), &overrides, writer)
            }
        },
    }
}

fn header_index(mapped: &MappedFile, separator: u8) -> FxHashMap<String, usize> {
    csv_row::split_fields(mapped.header_line(), separator)
        .iter()
        .enumerate()
        .map(|(i, name)| (String::from_utf8_lossy(name).trim().to_lowercase(), i))
        .collect()
}

fn require_column(header: &FxHashMap<String, usize>, column: &str) -> crate::Result<()> {
    if header.contains_key(&column.to_lowercase()) {
        Ok(())
    } else {
        Err(crate::Error::SchemaMismatch { column: column.to_string() })
    }
}

/// Finds the row starting at `offset`, trims its trailing `\r`, and splits
/// it into a lower-cased-column → value map (spec §4.10 "Row
/// materialization").
fn materialize_row(mapped: &MappedFile, offset: i64, separator: u8, header: &FxHashMap<String, usize>) -> HashMap<String, String> {
    let data = mapped.data();
    let start = offset as usize;
    let end = data[start..].iter().position(|&b| b == b'\n').map(|i| start + i).unwrap_or(data.len());
    let row = csv_row::trim_cr(&data[start..end]);
    let fields = csv_row::split_fields(row, separator);

    header
        .iter()
        .map(|(name, &idx)| (name.clone(), String::from_utf8_lossy(csv_row::field_at(&fields, idx)).into_owned()))
        .collect()
}

struct AggSetup {
    aggregator: Aggregator,
    group_col: String,
    agg_col: Option<String>,
}

fn agg_setup(query: &QueryConfig, header: &FxHashMap<String, usize>) -> crate::Result<Option<AggSetup>> {
    let Some(group_by) = query.group_by.as_deref() else {
        return Ok(None);
    };
    require_column(header, group_by)?;

    let func = aggregator::parse_agg_func(query.agg_func.as_deref().unwrap_or(""))?.unwrap_or(AggFunc::Count);
    let agg_col = query.agg_col.as_deref();
    if let Some(col) = agg_col {
        require_column(header, col)?;
    }

    Ok(Some(AggSetup {
        aggregator: Aggregator::new(func),
        group_col: group_by.to_lowercase(),
        agg_col: agg_col.map(str::to_lowercase),
    }))
}

/// `CountAll` (spec §4.10): sum index directory `record_count`s if any index
/// exists, else parallel-count newlines in the mapped CSV minus the header.
fn run_count_all(query: &QueryConfig, index_dir: &Path, csv_stem: &str, writer: &mut impl Write) -> crate::Result<()> {
    let prefix = format!("{csv_stem}_");
    let found_index = std::fs::read_dir(index_dir).into_iter().flatten().flatten().find_map(|entry| {
        let path = entry.path();
        let name = path.file_name()?.to_str()?.to_string();
        (name.starts_with(&prefix) && name.ends_with(".cidx")).then_some(path)
    });

    let count = match found_index {
        Some(path) => match BlockReader::open(&path, crate::compression::CompressionType::default()) {
            Ok(reader) => reader.directory().blocks.iter().map(|b| b.record_count as u64).sum(),
            Err(e) => {
                log::warn!("failed to open {} for CountAll: {e}, counting newlines", path.display());
                count_newlines(&query.csv_path)?
            }
        },
        None => count_newlines(&query.csv_path)?,
    };

    writeln!(writer, "{count}")?;
    Ok(())
}

/// Counts data rows by parallel-counting unquoted newlines across up to 16
/// chunks of the mapped body (spec §5: "the `CountAll` fallback which fans
/// newline counting across up to 16 workers").
fn count_newlines(csv_path: &Path) -> crate::Result<u64> {
    let mapped = match MappedFile::open(csv_path) {
        Ok(m) => m,
        Err(crate::Error::EmptyFile) => return Ok(0),
        Err(e) => return Err(e),
    };
    let data = mapped.data();
    let header_end = mapped.header_end().unwrap_or(data.len());
    let body = &data[header_end..];

    if body.is_empty() {
        return Ok(0);
    }

    let worker_count = 16usize.min(body.len().max(1));
    let chunk_len = body.len().div_ceil(worker_count).max(1);

    let total: u64 = body
        .par_chunks(chunk_len)
        .map(|chunk| {
            let mut in_quote = false;
            let mut count = 0u64;
            for &b in chunk {
                match b {
                    b'"' => in_quote = !in_quote,
                    b'\n' if !in_quote => count += 1,
                    _ => {}
                }
            }
            count
        })
        .sum();

    let trailing_row_without_newline = u64::from(!body.ends_with(b"\n"));
    Ok(total + trailing_row_without_newline)
}

/// Where matched rows go: a positional `offset,line` stream, a bare count,
/// or a grouped aggregation (spec §4.10 "Output encoding").
enum Sink {
    Positional { limit: usize, offset: usize, emitted: usize, skipped: usize },
    Count { emitted: u64 },
    Aggregate(AggSetup),
}

impl Sink {
    fn accept_row(&mut self, offset: i64, line: i64, writer: &mut impl Write) -> crate::Result<()> {
        match self {
            Sink::Positional { limit, offset: off, emitted, skipped } => {
                if *skipped < *off {
                    *skipped += 1;
                    return Ok(());
                }
                if *limit == 0 || *emitted < *limit {
                    writeln!(writer, "{offset},{line}")?;
                    *emitted += 1;
                }
                Ok(())
            }
            Sink::Count { emitted } => {
                *emitted += 1;
                Ok(())
            }
            Sink::Aggregate(_) => Ok(()),
        }
    }

    fn accept_group(&mut self, group_value: &str, raw_value: Option<&str>) {
        if let Sink::Aggregate(setup) = self {
            setup.aggregator.observe(group_value, raw_value);
        }
    }

    fn finish(self, writer: &mut impl Write) -> crate::Result<()> {
        match self {
            Sink::Positional { .. } => Ok(()),
            Sink::Count { emitted } => {
                writeln!(writer, "{emitted}")?;
                Ok(())
            }
            Sink::Aggregate(setup) => {
                let map = setup.aggregator.finalize();
                serde_json::to_writer(writer, &serde_json::Value::Object(map))?;
                Ok(())
            }
        }
    }
}

/// `FullScan` (spec §4.10): single-threaded row-by-row scan, applying
/// overrides then the condition, per §5 "single-threaded per query".
fn run_full_scan(query: &QueryConfig, condition: Option<&Condition>, overrides: &Overrides, writer: &mut impl Write) -> crate::Result<()> {
    let mapped = MappedFile::open(&query.csv_path)?;
    let header = header_index(&mapped, b',');
    let setup = agg_setup(query, &header)?;

    let mut sink = match setup {
        Some(setup) => Sink::Aggregate(setup),
        None if query.count_only => Sink::Count { emitted: 0 },
        None => Sink::Positional { limit: query.limit, offset: query.offset, emitted: 0, skipped: 0 },
    };

    let data = mapped.data();
    let header_end = mapped.header_end().unwrap_or(data.len());
    let body = &data[header_end..];

    let mut line = 2i64;
    for (start, end) in csv_row::RowIter::new(body) {
        let absolute_offset = (header_end + start) as i64;
        let row = csv_row::trim_cr(&body[start..end]);

        if row.is_empty() {
            line += 1;
            continue;
        }

        let fields = csv_row::split_fields(row, b',');
        let mut row_map: HashMap<String, String> = header
            .iter()
            .map(|(name, &idx)| (name.clone(), String::from_utf8_lossy(csv_row::field_at(&fields, idx)).into_owned()))
            .collect();
        overrides.apply(line, &mut row_map);

        let passes = condition.map(|c| condition::evaluate(c, &row_map)).unwrap_or(true);
        if passes {
            if let Sink::Aggregate(setup) = &sink {
                let group_value = row_map.get(&setup.group_col).cloned().unwrap_or_default();
                let raw_value = setup.agg_col.as_ref().and_then(|c| row_map.get(c)).cloned();
                sink.accept_group(&group_value, raw_value.as_deref());
            } else {
                sink.accept_row(absolute_offset, line, writer)?;
            }
        }

        line += 1;
    }

    sink.finish(writer)
}

/// `IndexedScan` / `CoveredIndex` (spec §4.10): bloom pre-check, binary
/// search to the leftmost candidate block, then iterate until the key
/// exceeds `search_key` (spec §4.10 "Iteration invariants").
fn run_indexed_scan(
    query: &QueryConfig,
    index_path: &Path,
    search_key: &[u8],
    covered: bool,
    condition: Option<&Condition>,
    writer: &mut impl Write,
) -> crate::Result<()> {
    let bloom_path = bloom_path_for(index_path);
    if bloom_path.exists() {
        if let Ok(bloom) = MappedBloomFilter::open(&bloom_path) {
            if !bloom.might_contain(search_key) {
                log::debug!("bloom filter rejected search key for {}", index_path.display());
                if query.count_only {
                    writeln!(writer, "0")?;
                }
                return Ok(());
            }
        }
    }

    let mut reader = BlockReader::open(index_path, crate::compression::CompressionType::default())?;
    let directory = reader.directory().clone();
    let starting = directory.starting_block(search_key);

    let mapped_csv = if covered { None } else { Some(MappedFile::open(&query.csv_path)?) };
    let header = mapped_csv.as_ref().map(|m| header_index(m, b','));

    let mut sink = if query.count_only {
        Sink::Count { emitted: 0 }
    } else {
        Sink::Positional { limit: query.limit, offset: query.offset, emitted: 0, skipped: 0 }
    };

    'blocks: for block in &directory.blocks[starting..] {
        let records = reader.read_block(block)?;
        for record in &records {
            let key = trim_trailing_zeros(record.key_bytes());
            if key < search_key {
                continue;
            }
            if key > search_key {
                break 'blocks;
            }

            let passes = passes_refilter(record, covered, condition, mapped_csv.as_ref(), header.as_ref());
            if passes {
                sink.accept_row(record.offset, record.line, &mut *writer)?;
            }
        }
    }

    sink.finish(writer)
}

fn passes_refilter(
    record: &Record,
    covered: bool,
    condition: Option<&Condition>,
    mapped_csv: Option<&MappedFile>,
    header: Option<&FxHashMap<String, usize>>,
) -> bool {
    if covered {
        return true;
    }
    let row = materialize_row(mapped_csv.expect("mapped csv present when not covered"), record.offset, b',', header.expect("header present when not covered"));
    condition.map(|c| condition::evaluate(c, &row)).unwrap_or(true)
}

fn bloom_path_for(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_os_string();
    name.push(".bloom");
    PathBuf::from(name)
}

/// `GroupByIndex` (spec §4.10): scan every block; a block flagged
/// `is_distinct` updates the accumulator from its metadata alone when
/// `agg_func ∈ {count, ""}`, otherwise it is decoded and observed per record.
fn run_group_by_index(query: &QueryConfig, index_path: &Path, writer: &mut impl Write) -> crate::Result<()> {
    let mut reader = BlockReader::open(index_path, crate::compression::CompressionType::default())?;
    let directory = reader.directory().clone();

    let func = aggregator::parse_agg_func(query.agg_func.as_deref().unwrap_or(""))?.unwrap_or(AggFunc::Count);
    let mut aggregator = Aggregator::new(func);

    let needs_value = !matches!(func, AggFunc::Count);
    let mapped_csv = if needs_value { Some(MappedFile::open(&query.csv_path)?) } else { None };
    let header = mapped_csv.as_ref().map(|m| header_index(m, b','));
    let agg_col = query.agg_col.as_deref().map(str::to_lowercase);

    if needs_value {
        let col = agg_col.as_deref().ok_or_else(|| crate::Error::BadRequest("agg_func requires agg_col".into()))?;
        require_column(header.as_ref().expect("header"), col)?;
    }

    for block in &directory.blocks {
        if block.is_distinct && matches!(func, AggFunc::Count) {
            aggregator.observe_block_count(&block.start_key, block.record_count as u64);
            continue;
        }

        let records = reader.read_block(block)?;
        for record in &records {
            let group_value = String::from_utf8_lossy(record.trimmed_key()).into_owned();
            let raw_value = if needs_value {
                let row = materialize_row(mapped_csv.as_ref().expect("mapped csv"), record.offset, b',', header.as_ref().expect("header"));
                agg_col.as_ref().and_then(|c| row.get(c).cloned())
            } else {
                None
            };
            aggregator.observe(&group_value, raw_value.as_deref());
        }
    }

    let map = aggregator.finalize();
    serde_json::to_writer(writer, &serde_json::Value::Object(map))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_manager;
    use test_log::test;

    fn write_csv(dir: &Path, contents: &[u8]) -> PathBuf {
        let path = dir.join("data.csv");
        std::fs::write(&path, contents).expect("write csv");
        path
    }

    #[test]
    fn full_scan_filters_by_equality() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,name,dept\n1,Alice,Eng\n2,Bob,Sales\n3,Carol,Eng\n4,Dave,Eng\n");

        let mut query = QueryConfig::new(csv_path);
        query.index_dir = Some(dir.path().to_path_buf());
        query.where_clause = Some(serde_json::json!({"dept": "Eng"}));

        let mut out = Vec::new();
        execute(&query, &mut out)?;
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(3, text.lines().count());

        Ok(())
    }

    #[test]
    fn count_only_without_index_counts_matches() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,dept\n1,Eng\n2,Sales\n3,Eng\n");

        let mut query = QueryConfig::new(csv_path);
        query.index_dir = Some(dir.path().to_path_buf());
        query.where_clause = Some(serde_json::json!({"dept": "Eng"}));
        query.count_only = true;

        let mut out = Vec::new();
        execute(&query, &mut out)?;
        assert_eq!("2\n", String::from_utf8(out).expect("utf8"));

        Ok(())
    }

    #[test]
    fn indexed_scan_matches_full_scan_result() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,name,dept\n1,Alice,Eng\n2,Bob,Sales\n3,Carol,Eng\n4,Dave,Eng\n");
        let index_dir = dir.path().join("indexes");
        index_manager::build(&csv_path, &index_dir, &serde_json::json!(["dept"]), &crate::config::Config::new())?;

        let mut query = QueryConfig::new(csv_path);
        query.index_dir = Some(index_dir);
        query.where_clause = Some(serde_json::json!({"dept": "Eng"}));
        query.count_only = true;

        let mut out = Vec::new();
        execute(&query, &mut out)?;
        assert_eq!("3\n", String::from_utf8(out).expect("utf8"));

        Ok(())
    }

    #[test]
    fn group_by_count_matches_expected_buckets() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,name,dept\n1,Alice,Eng\n2,Bob,Sales\n3,Carol,Eng\n4,Dave,Eng\n");
        let index_dir = dir.path().join("indexes");
        index_manager::build(&csv_path, &index_dir, &serde_json::json!(["dept"]), &crate::config::Config::new())?;

        let mut query = QueryConfig::new(csv_path);
        query.index_dir = Some(index_dir);
        query.group_by = Some("dept".to_string());
        query.agg_func = Some("count".to_string());

        let mut out = Vec::new();
        execute(&query, &mut out)?;
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(Some(&serde_json::Value::from(3)), value.get("Eng"));
        assert_eq!(Some(&serde_json::Value::from(1)), value.get("Sales"));

        Ok(())
    }

    #[test]
    fn explain_emits_plan_without_executing() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,dept\n1,Eng\n");

        let mut query = QueryConfig::new(csv_path);
        query.index_dir = Some(dir.path().to_path_buf());
        query.where_clause = Some(serde_json::json!({"dept": "Eng"}));
        query.explain = true;

        let mut out = Vec::new();
        execute(&query, &mut out)?;
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(Some(&serde_json::Value::from("FullScan")), value.get("strategy"));

        Ok(())
    }

    #[test]
    fn overrides_force_full_scan_even_with_index() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let csv_path = write_csv(dir.path(), b"id,dept\n1,Eng\n2,Sales\n");
        let index_dir = dir.path().join("indexes");
        index_manager::build(&csv_path, &index_dir, &serde_json::json!(["dept"]), &crate::config::Config::new())?;

        std::fs::write(dir.path().join("data_updates.json"), br#"{"rows":{"2":{"dept":"Eng"}}}"#)?;

        let mut query = QueryConfig::new(csv_path);
        query.index_dir = Some(index_dir);
        query.where_clause = Some(serde_json::json!({"dept": "Eng"}));
        query.count_only = true;

        let mut out = Vec::new();
        execute(&query, &mut out)?;
        assert_eq!("2\n", String::from_utf8(out).expect("utf8"));

        Ok(())
    }
}
