// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Row-level field splitting (spec §4.2 step 4, §4.10 "row materialization").
//!
//! Shared between the scanner (splitting a row it just located inside a
//! chunk) and the query executor (re-splitting a row it located by offset
//! in the mapped CSV). A single already-isolated row is short enough that
//! a scalar per-byte scan, rather than the chunk-wide bitmap machinery, is
//! the right tool here.

/// Splits one CSV row (no trailing `\n`/`\r`) into fields on `separator`,
/// ignoring separators inside quoted fields and stripping one layer of
/// surrounding `"..."` quoting per field (LazyQuotes: embedded quotes are
/// not required to be doubled, spec §6).
#[must_use]
pub fn split_fields(row: &[u8], separator: u8) -> Vec<Vec<u8>> {
    let mut fields = Vec::new();
    let mut field_start = 0;
    let mut in_quote = false;

    for (i, &b) in row.iter().enumerate() {
        if b == b'"' {
            in_quote = !in_quote;
        } else if b == separator && !in_quote {
            fields.push(extract_field(&row[field_start..i]));
            field_start = i + 1;
        }
    }
    fields.push(extract_field(&row[field_start..]));

    fields
}

fn extract_field(raw: &[u8]) -> Vec<u8> {
    if raw.len() >= 2 && raw[0] == b'"' && raw[raw.len() - 1] == b'"' {
        raw[1..raw.len() - 1].to_vec()
    } else {
        raw.to_vec()
    }
}

/// Returns the value at `col`, or an empty slice if the row has fewer
/// columns (spec §4.2: "missing columns left as empty byte slices").
#[must_use]
pub fn field_at(fields: &[Vec<u8>], col: usize) -> &[u8] {
    fields.get(col).map(Vec::as_slice).unwrap_or(&[])
}

/// Trims one trailing `\r` from a row already split on `\n` (spec §4.2).
#[must_use]
pub fn trim_cr(row: &[u8]) -> &[u8] {
    row.strip_suffix(b"\r").unwrap_or(row)
}

/// Builds the canonical composite-key representation for a set of column
/// values: a JSON array of strings, e.g. `["Eng","Carol"]` (spec §4.2 step
/// 5, §4.10). Used identically at index-build time and at query-plan time
/// so the two sides produce byte-identical keys.
#[must_use]
pub fn composite_key(values: &[&[u8]]) -> Vec<u8> {
    let strings: Vec<String> = values
        .iter()
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .collect();
    serde_json::to_vec(&strings).expect("string vec always serializes")
}

/// Walks `body` one physical row at a time, quote-aware, yielding each
/// row's `[start, end)` byte range excluding the terminator. Used by the
/// query executor's single-threaded `FullScan` path (spec §4.10), where the
/// scanner's parallel chunk machinery is unnecessary overhead.
pub struct RowIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RowIter<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Iterator for RowIter<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        let start = self.pos;
        let mut in_quote = false;
        let mut i = start;
        while i < self.data.len() {
            match self.data[i] {
                b'"' => in_quote = !in_quote,
                b'\n' if !in_quote => {
                    self.pos = i + 1;
                    return Some((start, i));
                }
                _ => {}
            }
            i += 1;
        }

        self.pos = self.data.len();
        Some((start, self.data.len()))
    }
}
