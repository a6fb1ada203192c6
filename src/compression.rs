// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{Decode, Encode, EncodeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Compression algorithm used for `.cidx` blocks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum CompressionType {
    /// No compression.
    None,

    /// LZ4 block compression (64 KiB block size), per spec §3/§4.4.
    #[cfg(feature = "lz4")]
    Lz4,
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "lz4")]
        {
            Self::Lz4
        }

        #[cfg(not(feature = "lz4"))]
        {
            Self::None
        }
    }
}

impl Encode for CompressionType {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::None => writer.write_u8(0)?,

            #[cfg(feature = "lz4")]
            Self::Lz4 => writer.write_u8(1)?,
        }

        Ok(())
    }
}

impl Decode for CompressionType {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let tag = reader.read_u8()?;

        match tag {
            0 => Ok(Self::None),

            #[cfg(feature = "lz4")]
            1 => Ok(Self::Lz4),

            tag => Err(crate::Error::IndexCorruption(format!(
                "unknown compression tag {tag}"
            ))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",

                #[cfg(feature = "lz4")]
                Self::Lz4 => "lz4",
            }
        )
    }
}

impl CompressionType {
    /// Compresses a raw byte buffer, per §4.4 step 2.
    #[must_use]
    pub fn compress(self, raw: &[u8]) -> Vec<u8> {
        match self {
            Self::None => raw.to_vec(),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::compress_prepend_size(raw),
        }
    }

    /// Decompresses a block previously produced by [`Self::compress`].
    pub fn decompress(self, compressed: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(compressed.to_vec()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::decompress_size_prepended(compressed)
                .map_err(|_| crate::Error::Decompress(self)),
        }
    }
}
