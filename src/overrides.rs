// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Row-override store (spec §3, §4.10, §6): `<csv>_updates.json` patches
//! applied per row at query time, forcing a full scan whenever non-empty.

use std::collections::HashMap;
use std::path::Path;

/// A loaded `<csv>_updates.json`: `line number -> column -> new value`.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    rows: HashMap<i64, HashMap<String, String>>,
}

impl Overrides {
    /// Loads `path`. A missing file is benign (returns `None`); a malformed
    /// one is a hard error (spec §4.10 "Failure semantics").
    pub fn load(path: &Path) -> crate::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(path)?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;

        let rows_value = value
            .get("rows")
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| crate::Error::BadRequest("updates file missing \"rows\"".into()))?;

        let mut rows = HashMap::with_capacity(rows_value.len());
        for (line_str, patch_value) in rows_value {
            let line: i64 = line_str
                .parse()
                .map_err(|_| crate::Error::BadRequest(format!("bad line number {line_str:?}")))?;

            let patch_obj = patch_value
                .as_object()
                .ok_or_else(|| crate::Error::BadRequest("row patch must be an object".into()))?;

            let mut patch = HashMap::with_capacity(patch_obj.len());
            for (column, new_value) in patch_obj {
                let value = match new_value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                patch.insert(column.to_lowercase(), value);
            }

            rows.insert(line, patch);
        }

        Ok(Some(Self { rows }))
    }

    /// `true` if there are no overrides at all, in which case the caller
    /// need not force a full scan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Applies any patch for `line` onto `row` in place.
    pub fn apply(&self, line: i64, row: &mut HashMap<String, String>) {
        if let Some(patch) = self.rows.get(&line) {
            for (column, value) in patch {
                row.insert(column.clone(), value.clone());
            }
        }
    }
}
