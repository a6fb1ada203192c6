// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Query planning and execution (spec §4.9, §4.10).

pub mod executor;
pub mod planner;

pub use executor::execute;

use serde::Serialize;
use std::path::PathBuf;

/// A query request, matching the collaborator-facing shape in spec §6.
#[derive(Clone, Debug, Default)]
pub struct QueryConfig {
    pub csv_path: PathBuf,
    pub index_dir: Option<PathBuf>,
    pub where_clause: Option<serde_json::Value>,
    pub limit: usize,
    pub offset: usize,
    pub count_only: bool,
    pub explain: bool,
    pub group_by: Option<String>,
    pub agg_col: Option<String>,
    pub agg_func: Option<String>,
}

impl QueryConfig {
    #[must_use]
    pub fn new(csv_path: PathBuf) -> Self {
        Self {
            csv_path,
            ..Default::default()
        }
    }
}

/// The `explain` output shape (SPEC_FULL.md "`explain` plan structure"
/// supplement): a concrete serialization the distilled spec left unstated.
#[derive(Clone, Debug, Serialize)]
pub struct QueryPlan {
    pub strategy: &'static str,
    #[serde(rename = "indexFile")]
    pub index_file: Option<String>,
    #[serde(rename = "searchKey")]
    pub search_key: Option<String>,
    pub covered: bool,
}

pub(crate) fn csv_stem(csv_path: &std::path::Path) -> String {
    csv_path
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("index")
        .to_string()
}

pub(crate) fn default_index_dir(csv_path: &std::path::Path) -> PathBuf {
    csv_path.parent().map(std::path::Path::to_path_buf).unwrap_or_default()
}
