// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::EncodeError;
use crate::compression::CompressionType;

/// Represents errors that can occur in the CSV index/query engine core.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// JSON (de)serialization failed (directory, metadata sidecar, overrides, condition tree)
    Json(serde_json::Error),

    /// Decompression failed
    Decompress(CompressionType),

    /// The requested file is empty (e.g. CSV with no bytes at all)
    EmptyFile,

    /// A requested column was not found in the CSV header
    SchemaMismatch {
        /// The column that was requested
        column: String,
    },

    /// Malformed request: bad JSON shape, unknown operator, or an invalid
    /// combination of query parameters (e.g. `agg_func` without `group_by`)
    BadRequest(String),

    /// The on-disk `.cidx` directory or block data is corrupt
    IndexCorruption(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Decompress(c) => write!(f, "decompression failed ({c})"),
            Self::EmptyFile => write!(f, "file is empty"),
            Self::SchemaMismatch { column } => write!(f, "column not found: {column}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::IndexCorruption(msg) => write!(f, "index corruption: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Core result type
pub type Result<T> = std::result::Result<T, Error>;
