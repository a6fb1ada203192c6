// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A byte-parallel CSV indexing and query engine.
//!
//! ##### About
//!
//! This crate treats a large CSV file as a memory-mapped byte span and
//! builds external, sorted `.cidx` index files over one or more columns,
//! without ever loading the whole file into memory. Once built, indexes
//! support equality lookups, composite-key lookups, and group-by
//! aggregation; queries with no usable index fall back to a single-threaded
//! full scan.
//!
//! The CSV is treated as read-only. Row-level corrections are applied via a
//! separate JSON overrides sidecar rather than rewriting the source file or
//! its indexes.
//!
//! # Example usage
//!
//! ```
//! use cidx_core::{index_manager, query, Config};
//! # let dir = tempfile::tempdir()?;
//! # let csv_path = dir.path().join("people.csv");
//! # std::fs::write(&csv_path, b"id,name,dept\n1,Alice,Eng\n2,Bob,Sales\n3,Carol,Eng\n")?;
//! let index_dir = dir.path().join("indexes");
//!
//! let config = Config::new();
//! index_manager::build(&csv_path, &index_dir, &serde_json::json!(["dept"]), &config)?;
//!
//! let mut request = query::QueryConfig::new(csv_path);
//! request.index_dir = Some(index_dir);
//! request.where_clause = Some(serde_json::json!({"dept": "Eng"}));
//! request.count_only = true;
//!
//! let mut out = Vec::new();
//! query::execute(&request, &mut out)?;
//! assert_eq!("2\n", String::from_utf8(out).unwrap());
//! #
//! # Ok::<(), cidx_core::Error>(())
//! ```

#![doc(html_logo_url = "https://raw.githubusercontent.com/fjall-rs/lsm-tree/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/fjall-rs/lsm-tree/main/logo.png")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod aggregator;

#[doc(hidden)]
pub mod block;

#[doc(hidden)]
pub mod bloom;

mod classifier;
mod coding;
pub mod condition;

#[doc(hidden)]
pub mod compression;

mod config;
pub mod csv_row;
mod error;

#[doc(hidden)]
pub mod file;

pub mod index_manager;
pub mod metadata;
mod mmap;
pub mod overrides;
pub mod query;

#[doc(hidden)]
pub mod record;

#[doc(hidden)]
pub mod scanner;

#[doc(hidden)]
pub mod sorter;

pub use compression::CompressionType;
pub use config::{Config, DEFAULT_BLOCK_SIZE, MIN_INDEX_MEMORY};
pub use error::{Error, Result};
pub use mmap::MappedFile;
