// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed 80-byte index record layout (spec §3, §4.3):
//!
//! ```text
//! [ key: 64 bytes, zero-padded ] [ offset: i64 BE ] [ line: i64 BE ]
//! ```

use crate::coding::{Decode, Encode, EncodeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Width of the fixed key field.
pub const KEY_LEN: usize = 64;

/// Total on-disk width of a record.
pub const RECORD_LEN: usize = KEY_LEN + 8 + 8;

/// A single index record: a (possibly truncated) key and the row position it points at.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Record {
    key: [u8; KEY_LEN],

    /// Byte offset of the row's first byte within the mapped CSV.
    pub offset: i64,

    /// 1-based global line number of the row.
    pub line: i64,
}

impl Record {
    /// Builds a record from a raw key slice, truncating to [`KEY_LEN`] bytes and
    /// zero-padding on the right, per spec §3.
    #[must_use]
    pub fn new(raw_key: &[u8], offset: i64, line: i64) -> Self {
        let mut key = [0u8; KEY_LEN];
        let n = raw_key.len().min(KEY_LEN);
        key[..n].copy_from_slice(&raw_key[..n]);

        Self { key, offset, line }
    }

    /// The raw, zero-padded key field.
    #[must_use]
    pub fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// The key with trailing zero padding trimmed, per spec §3 invariant.
    #[must_use]
    pub fn trimmed_key(&self) -> &[u8] {
        trim_trailing_zeros(&self.key)
    }

    /// Sort key used throughout the engine: `(key_bytes, offset)` ascending,
    /// per spec §4.6/§9 — padding participates in comparison directly,
    /// trimming is only for display/bloom insertion.
    #[must_use]
    pub fn sort_key(&self) -> (&[u8; KEY_LEN], i64) {
        (&self.key, self.offset)
    }
}

/// Trims trailing zero bytes from a key slice (spec §3: "compare by trimming
/// trailing zero bytes on the read side").
#[must_use]
pub fn trim_trailing_zeros(key: &[u8]) -> &[u8] {
    let end = key.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &key[..end]
}

impl Encode for Record {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&self.key)?;
        writer.write_i64::<BigEndian>(self.offset)?;
        writer.write_i64::<BigEndian>(self.line)?;
        Ok(())
    }
}

impl Decode for Record {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let mut key = [0u8; KEY_LEN];
        reader.read_exact(&mut key)?;
        let offset = reader.read_i64::<BigEndian>()?;
        let line = reader.read_i64::<BigEndian>()?;
        Ok(Self { key, offset, line })
    }
}

/// Encodes a batch of records back-to-back into a single heap buffer,
/// reused across calls by the caller (spec §4.3).
pub fn encode_batch(records: &[Record]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_LEN);
    for record in records {
        // Encoding into a Vec cannot fail.
        record.encode_into(&mut buf).expect("cannot fail");
    }
    buf
}

/// Decodes `count` back-to-back records from a buffer.
pub fn decode_batch<R: Read>(reader: &mut R, count: usize) -> crate::Result<Vec<Record>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(Record::decode_from(reader)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn record_round_trip() -> crate::Result<()> {
        let record = Record::new(b"hello", 1234, 5);
        let bytes = record.encode_into_vec();
        assert_eq!(RECORD_LEN, bytes.len());

        let decoded = Record::decode_from(&mut Cursor::new(bytes))?;
        assert_eq!(record, decoded);
        assert_eq!(b"hello", decoded.trimmed_key());

        Ok(())
    }

    #[test]
    fn record_key_truncation() {
        let long_key = vec![b'x'; 100];
        let record = Record::new(&long_key, 0, 1);
        assert_eq!(KEY_LEN, record.trimmed_key().len());
    }

    #[test]
    fn batch_round_trip() -> crate::Result<()> {
        let records = vec![
            Record::new(b"a", 0, 2),
            Record::new(b"b", 10, 3),
            Record::new(b"c", 20, 4),
        ];

        let bytes = encode_batch(&records);
        let decoded = decode_batch(&mut Cursor::new(bytes), records.len())?;
        assert_eq!(records, decoded);

        Ok(())
    }

    #[test]
    fn trim_trailing_zeros_works() {
        assert_eq!(b"abc", trim_trailing_zeros(b"abc\0\0\0"));
        assert_eq!(b"", trim_trailing_zeros(b"\0\0\0"));
        assert_eq!(b"abc", trim_trailing_zeros(b"abc"));
    }
}
