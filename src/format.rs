//! Compiled-store binary format: global header, flags, section layout.
//!
//! All structures here must stay bit-exact; compiled stores are mapped
//! directly and shared between processes. Integers are little-endian. The
//! file is laid out as:
//!
//! ```text
//! [Global header, 72 bytes]
//!   0   magic: [u8; 8]             // "0MGM4tCH"
//!   8   version: u32               // 1
//!   12  flags: u32                 // bit0 case-fold, bit1 ignore-punct,
//!                                  // bit2 elide-whitespace
//!   16  pattern_store_size: u64
//!   24  pattern_count: u32         // long-path patterns only
//!   28  smallest_len: u32
//!   32  largest_len: u32
//!   36  bloom_size: u32            // bloom bit-data bytes
//!   40  bucket_data_size: u32
//!   44  table_size: u32            // index-array length, power of two
//!   48  occupied_buckets: u32
//!   52  min_bucket: u32
//!   56  max_bucket: u32
//!   60  short_matcher_size: u32    // whole section, 0 if absent
//!   64  load_factor: f32
//!   68  avg_bucket: f32
//!
//! [Pattern store]    pattern_store_size bytes
//! [Bloom section]    16 + bloom_size bytes          ("0MG8L0oM")
//! [Index section]    8 + table_size * 4 bytes       ("0MG*H4sH")
//! [Bucket data]      bucket_data_size bytes
//! [Short matcher]    short_matcher_size bytes       ("0MG5HOrT", optional)
//! ```
//!
//! The file ends exactly at the last section; the loader rejects anything
//! shorter or longer. The compiler writes the header as zeros first and
//! rewrites it on close, so an interrupted build never carries the magic.

use crate::error::{MatchError, Result};
use serde::{Deserialize, Serialize};

/// Magic bytes opening a compiled store.
pub const STORE_MAGIC: &[u8; 8] = b"0MGM4tCH";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Global header size in bytes.
pub const HEADER_SIZE: usize = 72;

const FLAG_CASE_FOLD: u32 = 1 << 0;
const FLAG_IGNORE_PUNCT: u32 = 1 << 1;
const FLAG_ELIDE_WHITESPACE: u32 = 1 << 2;
const FLAG_ALL: u32 = FLAG_CASE_FOLD | FLAG_IGNORE_PUNCT | FLAG_ELIDE_WHITESPACE;

/// Normalization feature flags baked into a compiled store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFlags {
    /// Fold ASCII lowercase to uppercase.
    pub case_fold: bool,
    /// Strip POSIX punctuation.
    pub ignore_punct: bool,
    /// Collapse whitespace runs to a single space.
    pub elide_whitespace: bool,
}

impl StoreFlags {
    /// True if any transform flag is set.
    pub fn any(&self) -> bool {
        self.case_fold || self.ignore_punct || self.elide_whitespace
    }

    /// Pack into the header bit field.
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.case_fold {
            bits |= FLAG_CASE_FOLD;
        }
        if self.ignore_punct {
            bits |= FLAG_IGNORE_PUNCT;
        }
        if self.elide_whitespace {
            bits |= FLAG_ELIDE_WHITESPACE;
        }
        bits
    }

    /// Unpack from the header bit field, rejecting unknown bits.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !FLAG_ALL != 0 {
            return Err(MatchError::InvalidFormat(format!(
                "unknown flag bits 0x{:08x}",
                bits & !FLAG_ALL
            )));
        }
        Ok(StoreFlags {
            case_fold: bits & FLAG_CASE_FOLD != 0,
            ignore_punct: bits & FLAG_IGNORE_PUNCT != 0,
            elide_whitespace: bits & FLAG_ELIDE_WHITESPACE != 0,
        })
    }
}

/// Parsed global header of a compiled store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreHeader {
    /// Format version.
    pub version: u32,
    /// Normalization flags.
    pub flags: StoreFlags,
    /// Pattern-store byte size.
    pub pattern_store_size: u64,
    /// Stored long-path pattern count.
    pub pattern_count: u32,
    /// Smallest pattern length in the store (post-normalization).
    pub smallest_len: u32,
    /// Largest pattern length in the store (post-normalization).
    pub largest_len: u32,
    /// Bloom bit-data byte size.
    pub bloom_size: u32,
    /// Bucket-data region byte size.
    pub bucket_data_size: u32,
    /// Index-array length (power of two).
    pub table_size: u32,
    /// Occupied bucket count.
    pub occupied_buckets: u32,
    /// Smallest bucket entry count.
    pub min_bucket: u32,
    /// Largest bucket entry count.
    pub max_bucket: u32,
    /// Short-matcher section byte size, 0 when absent.
    pub short_matcher_size: u32,
    /// Occupied buckets over table size.
    pub load_factor: f32,
    /// Mean entries per occupied bucket.
    pub avg_bucket: f32,
}

impl StoreHeader {
    /// Serialize to the exact 72-byte on-disk image.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(STORE_MAGIC);
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[16..24].copy_from_slice(&self.pattern_store_size.to_le_bytes());
        out[24..28].copy_from_slice(&self.pattern_count.to_le_bytes());
        out[28..32].copy_from_slice(&self.smallest_len.to_le_bytes());
        out[32..36].copy_from_slice(&self.largest_len.to_le_bytes());
        out[36..40].copy_from_slice(&self.bloom_size.to_le_bytes());
        out[40..44].copy_from_slice(&self.bucket_data_size.to_le_bytes());
        out[44..48].copy_from_slice(&self.table_size.to_le_bytes());
        out[48..52].copy_from_slice(&self.occupied_buckets.to_le_bytes());
        out[52..56].copy_from_slice(&self.min_bucket.to_le_bytes());
        out[56..60].copy_from_slice(&self.max_bucket.to_le_bytes());
        out[60..64].copy_from_slice(&self.short_matcher_size.to_le_bytes());
        out[64..68].copy_from_slice(&self.load_factor.to_le_bytes());
        out[68..72].copy_from_slice(&self.avg_bucket.to_le_bytes());
        out
    }

    /// Parse and validate the header at the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(MatchError::InvalidFormat(format!(
                "store is {} bytes, smaller than the {}-byte header",
                buf.len(),
                HEADER_SIZE
            )));
        }
        if &buf[0..8] != STORE_MAGIC {
            return Err(MatchError::InvalidFormat(format!(
                "store magic mismatch: {:02x?}",
                &buf[0..8]
            )));
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(MatchError::InvalidFormat(format!(
                "unsupported version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        let flags = StoreFlags::from_bits(u32::from_le_bytes(buf[12..16].try_into().unwrap()))?;

        let header = StoreHeader {
            version,
            flags,
            pattern_store_size: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            pattern_count: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            smallest_len: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            largest_len: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            bloom_size: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            bucket_data_size: u32::from_le_bytes(buf[40..44].try_into().unwrap()),
            table_size: u32::from_le_bytes(buf[44..48].try_into().unwrap()),
            occupied_buckets: u32::from_le_bytes(buf[48..52].try_into().unwrap()),
            min_bucket: u32::from_le_bytes(buf[52..56].try_into().unwrap()),
            max_bucket: u32::from_le_bytes(buf[56..60].try_into().unwrap()),
            short_matcher_size: u32::from_le_bytes(buf[60..64].try_into().unwrap()),
            load_factor: f32::from_le_bytes(buf[64..68].try_into().unwrap()),
            avg_bucket: f32::from_le_bytes(buf[68..72].try_into().unwrap()),
        };

        if header.table_size == 0 || !header.table_size.is_power_of_two() {
            return Err(MatchError::InvalidFormat(format!(
                "index length {} is not a power of two",
                header.table_size
            )));
        }
        if header.smallest_len > header.largest_len {
            return Err(MatchError::InvalidFormat(format!(
                "smallest length {} exceeds largest {}",
                header.smallest_len, header.largest_len
            )));
        }
        Ok(header)
    }

    /// Byte layout of the sections following the header.
    pub fn layout(&self) -> StoreLayout {
        let pattern_store = HEADER_SIZE;
        let bloom = pattern_store + self.pattern_store_size as usize;
        let index = bloom + 16 + self.bloom_size as usize;
        let bucket_data = index + 8 + self.table_size as usize * 4;
        let short = bucket_data + self.bucket_data_size as usize;
        let end = short + self.short_matcher_size as usize;
        StoreLayout {
            pattern_store,
            bloom,
            index,
            bucket_data,
            short,
            total_size: end,
        }
    }
}

/// Absolute byte offsets of each section within a compiled store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    /// Start of the pattern store.
    pub pattern_store: usize,
    /// Start of the bloom section (its magic).
    pub bloom: usize,
    /// Start of the index section (its magic).
    pub index: usize,
    /// Start of the bucket-data region.
    pub bucket_data: usize,
    /// Start of the short-matcher section, equal to `total_size` when absent.
    pub short: usize,
    /// Exact expected file size.
    pub total_size: usize,
}
