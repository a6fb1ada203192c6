// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bloom filter (spec §3, §4.7).
//!
//! A fixed-size bit array with `k` hashes, using double hashing built from
//! two independent CRC32 passes (spec §4.7), rather than the teacher's
//! xxh3-based double hashing — the on-disk hash scheme is part of the
//! `.cidx.bloom` contract and must match spec §4.7 exactly.

mod bit_array;

use bit_array::BitArray;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// The two CRC32-derived hashes used for double hashing (spec §4.7).
pub type CompositeHash = (u32, u32);

/// Computes `(h1, h2)` for a key per spec §4.7:
/// `h1 = CRC32(key)`, `h2 = CRC32(reverse(key) || "salt")`.
#[must_use]
pub fn hash_key(key: &[u8]) -> CompositeHash {
    let h1 = crc32fast::hash(key);

    let mut reversed = key.to_vec();
    reversed.reverse();
    reversed.extend_from_slice(b"salt");
    let h2 = crc32fast::hash(&reversed);

    (h1, h2)
}

fn bit_indices((h1, h2): CompositeHash, k: usize, m: usize) -> impl Iterator<Item = usize> {
    (0..k as u64).map(move |i| ((u64::from(h1) + i * u64::from(h2)) % (m as u64)) as usize)
}

/// An owned bloom filter, built incrementally during an index build (spec §4.6/§4.7).
#[derive(Debug, Eq, PartialEq)]
pub struct BloomFilter {
    bits: BitArray,
    m: usize,
    k: usize,
    n: usize,
}

impl BloomFilter {
    /// Constructs a bloom filter sized for `n` items at false-positive rate `p`,
    /// per spec §4.7:
    /// `m = ceil(-n * ln(p) / 0.4804)` bits, rounded up to a multiple of 8,
    /// minimum 1024; `k = max(1, min(10, round(m/n * 0.693)))`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn with_fp_rate(n: usize, p: f64) -> Self {
        assert!(n > 0, "bloom filter capacity must be > 0");

        let p = p.clamp(1e-9, 0.999_999);
        let raw_m = (-(n as f64) * p.ln() / 0.480_4).ceil() as usize;
        let m = raw_m.next_multiple_of(8).max(1024);

        let bpk = m as f64 / n as f64;
        let k = ((bpk * 0.693).round() as usize).clamp(1, 10);

        Self {
            bits: BitArray::with_capacity(m / 8),
            m,
            k,
            n: 0,
        }
    }

    /// Number of hash functions used per lookup/insert.
    #[must_use]
    pub fn hash_fn_count(&self) -> usize {
        self.k
    }

    /// Number of bits in the filter.
    #[must_use]
    pub fn bit_count(&self) -> usize {
        self.m
    }

    /// Number of elements inserted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Inserts a key's hash into the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let hash = hash_key(key);
        for idx in bit_indices(hash, self.k, self.m) {
            self.bits.set(idx, true);
        }
        self.n += 1;
    }

    /// Returns `true` if `key` might be contained. Never false-negative
    /// for keys actually inserted (spec §3 invariant).
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let hash = hash_key(key);
        bit_indices(hash, self.k, self.m).all(|idx| self.bits.get(idx))
    }

    /// Writes the `.cidx.bloom` file per spec §3/§6:
    /// `(size_bits, hash_count, element_count)` as big-endian `i64`s, followed
    /// by the raw bit array.
    pub fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        writer.write_i64::<BigEndian>(self.m as i64)?;
        writer.write_i64::<BigEndian>(self.k as i64)?;
        writer.write_i64::<BigEndian>(self.n as i64)?;
        writer.write_all(self.bits.bytes())?;
        Ok(())
    }

    /// Writes the filter to `path` as a complete `.cidx.bloom` file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let mut file = File::create(path)?;
        self.write_to(&mut file)?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads a bloom filter fully into memory from a reader.
    pub fn read_from(reader: &mut impl Read) -> crate::Result<Self> {
        let m = reader.read_i64::<BigEndian>()? as usize;
        let k = reader.read_i64::<BigEndian>()? as usize;
        let n = reader.read_i64::<BigEndian>()? as usize;

        let mut bytes = vec![0u8; m / 8];
        reader.read_exact(&mut bytes)?;

        Ok(Self {
            bits: BitArray::from_bytes(bytes.into_boxed_slice()),
            m,
            k,
            n,
        })
    }
}

/// A bloom filter backed by a memory-mapped `.cidx.bloom` file.
///
/// Per spec §9 ("Bloom filter lifetime"), the mapping must remain valid for
/// the lifetime of every [`MappedBloomFilter::might_contain`] call; since this
/// type owns its [`Mmap`] directly, it *is* the opaque cleanup handle —
/// dropping it unmaps the file.
pub struct MappedBloomFilter {
    mmap: Mmap,
    m: usize,
    k: usize,
}

const HEADER_LEN: usize = 24;

impl MappedBloomFilter {
    /// Maps `path` read-only and parses its 24-byte header.
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let file = File::open(path.as_ref())?;

        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN {
            return Err(crate::Error::IndexCorruption(
                "bloom filter file shorter than header".into(),
            ));
        }

        let m = i64::from_be_bytes(mmap[0..8].try_into().expect("8 bytes")) as usize;
        let k = i64::from_be_bytes(mmap[8..16].try_into().expect("8 bytes")) as usize;

        if mmap.len() < HEADER_LEN + m / 8 {
            return Err(crate::Error::IndexCorruption(
                "bloom filter file truncated".into(),
            ));
        }

        Ok(Self { mmap, m, k })
    }

    /// Returns `true` if `key` might be contained.
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let bits = &self.mmap[HEADER_LEN..HEADER_LEN + self.m / 8];
        let hash = hash_key(key);
        bit_indices(hash, self.k, self.m).all(|idx| bit_array::get(bits, idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn bloom_no_false_negatives() {
        let mut filter = BloomFilter::with_fp_rate(100, 0.01);

        let keys: Vec<String> = (0..100).map(|i| format!("key-{i}")).collect();
        for key in &keys {
            filter.insert(key.as_bytes());
        }

        for key in &keys {
            assert!(filter.might_contain(key.as_bytes()));
        }
    }

    #[test]
    fn bloom_serde_round_trip() -> crate::Result<()> {
        let mut filter = BloomFilter::with_fp_rate(10, 0.0001);
        for key in [b"item0", b"item1", b"item2"] {
            filter.insert(key);
        }

        let mut buf = Vec::new();
        filter.write_to(&mut buf)?;

        let decoded = BloomFilter::read_from(&mut Cursor::new(buf))?;
        assert_eq!(filter, decoded);

        for key in [b"item0", b"item1", b"item2"] {
            assert!(decoded.might_contain(key));
        }

        Ok(())
    }

    #[test]
    fn bloom_mapped_round_trip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.cidx.bloom");

        let mut filter = BloomFilter::with_fp_rate(50, 0.01);
        let keys: Vec<String> = (0..50).map(|i| format!("k{i}")).collect();
        for key in &keys {
            filter.insert(key.as_bytes());
        }
        filter.write_to_file(&path)?;

        let mapped = MappedBloomFilter::open(&path)?;
        for key in &keys {
            assert!(mapped.might_contain(key.as_bytes()));
        }

        Ok(())
    }

    #[test]
    fn bloom_rejects_absent_key_most_of_the_time() {
        let mut filter = BloomFilter::with_fp_rate(1_000, 0.01);
        for i in 0..1_000 {
            filter.insert(format!("present-{i}").as_bytes());
        }

        assert!(!filter.might_contain(b"NONEXISTENT_12345"));
    }
}
