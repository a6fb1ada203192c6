// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Byte-parallel CSV scanner (spec §4.2).
//!
//! Splits the mapped body into quote-safe worker chunks, counts unquoted
//! newlines per chunk to assign each chunk a consistent starting global
//! line number, then scans each chunk in parallel using the [`crate::classifier`]
//! bitmaps to find record boundaries and extract index keys.

use crate::classifier::{self, Bitmaps};
use crate::csv_row;
use crate::mmap::MappedFile;
use rayon::prelude::*;

/// One index definition's column indices, in the order given at build time.
/// Composite groups are expected to already be in the canonical (sorted)
/// column order used by the query planner (spec §4.10).
#[derive(Clone, Debug)]
pub struct IndexGroup {
    pub columns: Vec<usize>,
}

/// Receives one emitted row per callback. `keys[i]` corresponds to `groups[i]`
/// passed to [`scan`]. Implementors that enqueue `keys` across a thread
/// boundary get an owned copy for free — the scanner never reuses these
/// buffers after the call returns.
pub trait RowHandler: Sync {
    fn handle(&self, worker_id: usize, keys: &[Vec<u8>], offset: i64, line: i64);
}

/// Running totals produced by a full scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanStats {
    pub rows_scanned: u64,
    pub bytes_scanned: u64,
}

/// Scans `mapped` in `worker_count` parallel chunks, invoking `handler` once
/// per data row (spec §4.2). Chunk boundaries always fall immediately after
/// a `\n` that is not inside a quoted field.
pub fn scan(
    mapped: &MappedFile,
    separator: u8,
    worker_count: usize,
    groups: &[IndexGroup],
    handler: &(dyn RowHandler + Sync),
) -> crate::Result<ScanStats> {
    let data = mapped.data();
    let header_end = mapped.header_end().unwrap_or(data.len());
    let body = &data[header_end..];

    if body.is_empty() {
        return Ok(ScanStats::default());
    }

    let boundaries = compute_boundaries(body, worker_count.max(1));
    let chunk_ranges: Vec<(usize, usize)> = boundaries.windows(2).map(|w| (w[0], w[1])).collect();

    // Pre-pass: per-chunk unquoted newline counts, prefix-summed into
    // starting global line numbers (spec §4.2 "global line numbering").
    let counts: Vec<u64> = chunk_ranges
        .par_iter()
        .map(|&(start, end)| count_unquoted_newlines(&body[start..end]))
        .collect();

    let mut start_lines = Vec::with_capacity(counts.len());
    let mut running = 2i64; // line 1 is the header
    for &count in &counts {
        start_lines.push(running);
        running += count as i64;
    }

    let max_col = groups
        .iter()
        .flat_map(|g| g.columns.iter())
        .copied()
        .max()
        .unwrap_or(0);

    let per_chunk: Vec<ScanStats> = chunk_ranges
        .par_iter()
        .zip(start_lines.par_iter())
        .enumerate()
        .map(|(worker_id, (&(start, end), &start_line))| {
            scan_chunk(
                &body[start..end],
                header_end + start,
                start_line,
                separator,
                max_col,
                groups,
                worker_id,
                handler,
            )
        })
        .collect();

    Ok(per_chunk.into_iter().fold(ScanStats::default(), |acc, s| ScanStats {
        rows_scanned: acc.rows_scanned + s.rows_scanned,
        bytes_scanned: acc.bytes_scanned + s.bytes_scanned,
    }))
}

/// Finds `worker_count + 1` quote-safe offsets into `body`, the first `0`
/// and the last `body.len()`, by a single forward scan tracking quote
/// parity (spec §4.2 "chunk partitioning").
fn compute_boundaries(body: &[u8], worker_count: usize) -> Vec<usize> {
    let mut boundaries = vec![0usize];

    if worker_count <= 1 {
        boundaries.push(body.len());
        return boundaries;
    }

    let hints: Vec<usize> = (1..worker_count).map(|i| body.len() * i / worker_count).collect();
    let mut hint_idx = 0;
    let mut in_quote = false;

    for (i, &b) in body.iter().enumerate() {
        if hint_idx >= hints.len() {
            break;
        }

        if b == b'"' {
            in_quote = !in_quote;
            continue;
        }

        if b == b'\n' && !in_quote {
            let next_line_start = i + 1;
            while hint_idx < hints.len() && next_line_start >= hints[hint_idx] {
                boundaries.push(next_line_start);
                hint_idx += 1;
            }
        }
    }

    while boundaries.len() < worker_count {
        boundaries.push(body.len());
    }
    boundaries.push(body.len());
    boundaries.dedup();

    boundaries
}

fn count_unquoted_newlines(chunk: &[u8]) -> u64 {
    let mut in_quote = false;
    let mut count = 0u64;
    for &b in chunk {
        if b == b'"' {
            in_quote = !in_quote;
        } else if b == b'\n' && !in_quote {
            count += 1;
        }
    }
    count
}

#[allow(clippy::too_many_arguments)]
fn scan_chunk(
    chunk: &[u8],
    chunk_file_base: usize,
    start_line: i64,
    separator: u8,
    max_col: usize,
    groups: &[IndexGroup],
    worker_id: usize,
    handler: &(dyn RowHandler + Sync),
) -> ScanStats {
    let bitmaps = classify(chunk, separator);
    let mut in_quote = false;
    let mut row_start = 0usize;
    let mut line = start_line;
    let mut rows_scanned = 0u64;

    for pos in UnionIter::new(&bitmaps) {
        if Bitmaps::test(&bitmaps.quotes, pos) {
            in_quote = !in_quote;
            continue;
        }

        // Union position not a quote: must be a newline.
        if in_quote {
            continue;
        }

        emit_row(
            chunk,
            row_start,
            pos,
            separator,
            max_col,
            groups,
            worker_id,
            chunk_file_base,
            line,
            handler,
        );
        rows_scanned += 1;
        line += 1;
        row_start = pos + 1;
    }

    if row_start < chunk.len() {
        emit_row(
            chunk,
            row_start,
            chunk.len(),
            separator,
            max_col,
            groups,
            worker_id,
            chunk_file_base,
            line,
            handler,
        );
        rows_scanned += 1;
    }

    ScanStats {
        rows_scanned,
        bytes_scanned: chunk.len() as u64,
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_row(
    chunk: &[u8],
    row_start: usize,
    row_end: usize,
    separator: u8,
    max_col: usize,
    groups: &[IndexGroup],
    worker_id: usize,
    chunk_file_base: usize,
    line: i64,
    handler: &(dyn RowHandler + Sync),
) {
    if row_start >= row_end {
        return; // skip empty lines (spec §4.2)
    }

    let row = csv_row::trim_cr(&chunk[row_start..row_end]);
    let fields = csv_row::split_fields(row, separator);
    let _ = max_col; // field splitting already yields every present column

    let keys: Vec<Vec<u8>> = groups
        .iter()
        .map(|group| {
            if group.columns.len() == 1 {
                csv_row::field_at(&fields, group.columns[0]).to_vec()
            } else {
                let values: Vec<&[u8]> = group
                    .columns
                    .iter()
                    .map(|&c| csv_row::field_at(&fields, c))
                    .collect();
                csv_row::composite_key(&values)
            }
        })
        .collect();

    handler.handle(worker_id, &keys, (chunk_file_base + row_start) as i64, line);
}

fn classify(chunk: &[u8], separator: u8) -> Bitmaps {
    classifier::classify(chunk, separator)
}

/// Iterates set positions in the union of a chunk's quote and newline
/// bitmaps, ascending (spec §4.2 step 2).
struct UnionIter<'a> {
    inner: classifier::UnionBitIter<'a>,
}

impl<'a> UnionIter<'a> {
    fn new(bitmaps: &'a Bitmaps) -> Self {
        Self {
            inner: classifier::UnionBitIter::new(&bitmaps.quotes, &bitmaps.newlines),
        }
    }
}

impl Iterator for UnionIter<'_> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        self.inner.next()
    }
}
