//! Gram-keyed bucket table: the long-path index of the compiled store.
//!
//! At build time this is a Robin-Hood open-addressed map from a pattern's
//! leading 4-byte gram to a growable list of `(pattern offset, length)`
//! references. Patterns sharing a leading gram share one bucket.
//!
//! At serialize time the map flattens into two regions:
//!
//! ```text
//! [Index section]
//!   magic: [u8; 8]              // "0MG*H4sH"
//!   slots: [u32; table_size]    // byte offset into bucket data, or 0xFFFFFFFF
//!
//! [Bucket data region]
//!   per occupied bucket:
//!     key: u32                  // the 4-byte gram
//!     count: u32
//!     entries: count × { offset: u64, len: u32, tail_skips: u32 }
//! ```
//!
//! `tail_skips` counts the trailing source bytes the normalization
//! transform dropped from the pattern; it is zero in stores compiled
//! without a transform, and readers that treat the word as reserved
//! padding still probe correctly.
//!
//! Scan-time probing walks the mapped regions directly; no allocation.

use crate::error::{MatchError, Result};
use crate::hashing::bucket_hash;
use rayon::prelude::*;

/// Magic bytes opening the hash index section.
pub const INDEX_MAGIC: &[u8; 8] = b"0MG*H4sH";

/// Sentinel marking an empty index slot.
pub const EMPTY_SLOT: u32 = 0xFFFF_FFFF;

/// Bytes per serialized bucket entry.
const ENTRY_SIZE: usize = 16;

/// Reference to a pattern held in the pattern store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternRef {
    /// Byte offset from the start of the pattern store.
    pub offset: u64,
    /// Pattern length in bytes.
    pub len: u32,
    /// Trailing source bytes the transform dropped from the pattern.
    pub tail_skips: u32,
}

struct BuildSlot {
    key: u32,
    dist: u32,
    patterns: Vec<PatternRef>,
}

/// Build-time bucket table.
pub struct BucketTableBuilder {
    slots: Vec<Option<BuildSlot>>,
    occupied: usize,
}

const INITIAL_TABLE_SIZE: usize = 8192;
const MAX_LOAD_NUM: usize = 9;
const MAX_LOAD_DEN: usize = 10;

impl BucketTableBuilder {
    /// Create an empty table at the initial capacity.
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(INITIAL_TABLE_SIZE, || None);
        BucketTableBuilder { slots, occupied: 0 }
    }

    /// Current index-array length (always a power of two).
    pub fn table_size(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied buckets (distinct gram keys).
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Insert a pattern reference under its leading gram.
    ///
    /// Duplicate keys append to the existing bucket.
    pub fn insert(&mut self, gram: u32, pattern: PatternRef) {
        if (self.occupied + 1) * MAX_LOAD_DEN > self.slots.len() * MAX_LOAD_NUM {
            self.grow();
        }

        let mask = self.slots.len() - 1;
        let mut idx = (bucket_hash(gram) as usize) & mask;
        let mut dist = 0u32;

        loop {
            match &mut self.slots[idx] {
                None => {
                    self.slots[idx] = Some(BuildSlot {
                        key: gram,
                        dist,
                        patterns: vec![pattern],
                    });
                    self.occupied += 1;
                    return;
                }
                Some(slot) => {
                    if slot.key == gram {
                        slot.patterns.push(pattern);
                        return;
                    }
                    if slot.dist < dist {
                        let displaced = self.slots[idx]
                            .replace(BuildSlot {
                                key: gram,
                                dist,
                                patterns: vec![pattern],
                            })
                            .unwrap();
                        self.insert_displaced(displaced, idx, mask);
                        self.occupied += 1;
                        return;
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
        }
    }

    fn insert_displaced(&mut self, mut entry: BuildSlot, from: usize, mask: usize) {
        let mut idx = (from + 1) & mask;
        entry.dist += 1;
        loop {
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(entry);
                    return;
                }
                Some(slot) => {
                    if slot.dist < entry.dist {
                        entry = self.slots[idx].replace(entry).unwrap();
                    }
                }
            }
            idx = (idx + 1) & mask;
            entry.dist += 1;
        }
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, {
            let mut v = Vec::new();
            v.resize_with(new_cap, || None);
            v
        });
        self.occupied = 0;
        let mask = new_cap - 1;
        for slot in old.into_iter().flatten() {
            self.reinsert(slot.key, slot.patterns, mask);
        }
    }

    fn reinsert(&mut self, key: u32, patterns: Vec<PatternRef>, mask: usize) {
        let mut entry = BuildSlot {
            key,
            dist: 0,
            patterns,
        };
        let mut idx = (bucket_hash(key) as usize) & mask;
        loop {
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(entry);
                    self.occupied += 1;
                    return;
                }
                Some(slot) => {
                    if slot.dist < entry.dist {
                        entry = self.slots[idx].replace(entry).unwrap();
                    }
                }
            }
            idx = (idx + 1) & mask;
            entry.dist += 1;
        }
    }

    /// Iterate the distinct gram keys (bloom construction input).
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().flatten().map(|slot| slot.key)
    }

    /// Sort every bucket's pattern list by descending length.
    ///
    /// Scan walks buckets in serialized order, so longer candidates are
    /// visited first. Stable sort keeps insertion order among equal lengths.
    pub fn sort_buckets(&mut self) {
        self.slots.par_iter_mut().for_each(|slot| {
            if let Some(slot) = slot {
                slot.patterns.sort_by(|a, b| b.len.cmp(&a.len));
            }
        });
    }

    /// Flatten into the index section and bucket-data region.
    pub fn serialize(&self) -> SerializedTable {
        let table_size = self.slots.len();
        let mut index = Vec::with_capacity(8 + table_size * 4);
        index.extend_from_slice(INDEX_MAGIC);

        let mut data = Vec::new();
        let mut min_bucket = u32::MAX;
        let mut max_bucket = 0u32;

        for slot in &self.slots {
            match slot {
                None => index.extend_from_slice(&EMPTY_SLOT.to_le_bytes()),
                Some(slot) => {
                    let record_offset = data.len() as u32;
                    index.extend_from_slice(&record_offset.to_le_bytes());

                    let count = slot.patterns.len() as u32;
                    min_bucket = min_bucket.min(count);
                    max_bucket = max_bucket.max(count);

                    data.extend_from_slice(&slot.key.to_le_bytes());
                    data.extend_from_slice(&count.to_le_bytes());
                    for p in &slot.patterns {
                        data.extend_from_slice(&p.offset.to_le_bytes());
                        data.extend_from_slice(&p.len.to_le_bytes());
                        data.extend_from_slice(&p.tail_skips.to_le_bytes());
                    }
                }
            }
        }

        if self.occupied == 0 {
            min_bucket = 0;
        }

        SerializedTable {
            index,
            data,
            table_size: table_size as u32,
            occupied: self.occupied as u32,
            min_bucket,
            max_bucket,
        }
    }
}

impl Default for BucketTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of [`BucketTableBuilder::serialize`].
pub struct SerializedTable {
    /// Index section bytes (magic + slot array).
    pub index: Vec<u8>,
    /// Bucket-data region bytes.
    pub data: Vec<u8>,
    /// Index-array length.
    pub table_size: u32,
    /// Occupied bucket count.
    pub occupied: u32,
    /// Smallest bucket entry count (0 when no buckets).
    pub min_bucket: u32,
    /// Largest bucket entry count.
    pub max_bucket: u32,
}

/// Read-only probe view over the mapped index and bucket-data regions.
#[derive(Clone, Copy)]
pub struct BucketIndexView<'a> {
    slots: &'a [u8],
    data: &'a [u8],
    table_size: u32,
    mask: u32,
}

impl<'a> BucketIndexView<'a> {
    /// Lay a view over `index` (magic + slots) and `data`, validating every
    /// slot offset against the data region and every pattern reference
    /// against a pattern store of `patterns_len` bytes.
    pub fn parse(
        index: &'a [u8],
        data: &'a [u8],
        table_size: u32,
        patterns_len: u64,
    ) -> Result<Self> {
        if table_size == 0 || !table_size.is_power_of_two() {
            return Err(MatchError::InvalidFormat(format!(
                "index length {} is not a power of two",
                table_size
            )));
        }
        let want = 8 + table_size as usize * 4;
        if index.len() != want {
            return Err(MatchError::InvalidFormat(format!(
                "index section is {} bytes, expected {}",
                index.len(),
                want
            )));
        }
        if &index[0..8] != INDEX_MAGIC {
            return Err(MatchError::InvalidFormat(format!(
                "index magic mismatch: {:02x?}",
                &index[0..8]
            )));
        }

        let view = BucketIndexView {
            slots: &index[8..],
            data,
            table_size,
            mask: table_size - 1,
        };

        for i in 0..table_size {
            let off = view.slot_value(i);
            if off == EMPTY_SLOT {
                continue;
            }
            let off = off as usize;
            if off + 8 > data.len() {
                return Err(MatchError::InvalidFormat(format!(
                    "bucket record at {} overruns data region of {} bytes",
                    off,
                    data.len()
                )));
            }
            let count =
                u32::from_le_bytes(data[off + 4..off + 8].try_into().unwrap()) as usize;
            if count == 0 || off + 8 + count * ENTRY_SIZE > data.len() {
                return Err(MatchError::InvalidFormat(format!(
                    "bucket record at {} with count {} is inconsistent",
                    off, count
                )));
            }
            for e in 0..count {
                let at = off + 8 + e * ENTRY_SIZE;
                let p_off = u64::from_le_bytes(data[at..at + 8].try_into().unwrap());
                let p_len = u32::from_le_bytes(data[at + 8..at + 12].try_into().unwrap());
                let end = p_off.checked_add(p_len as u64);
                if p_len < 5 || end.is_none() || end.unwrap() > patterns_len {
                    return Err(MatchError::InvalidFormat(format!(
                        "bucket entry ({}, {}) falls outside the {}-byte pattern store",
                        p_off, p_len, patterns_len
                    )));
                }
            }
        }

        Ok(view)
    }

    #[inline(always)]
    fn slot_value(&self, idx: u32) -> u32 {
        let at = idx as usize * 4;
        u32::from_le_bytes(self.slots[at..at + 4].try_into().unwrap())
    }

    /// Probe for `gram`. Returns the bucket's entries on a key hit.
    #[inline]
    pub fn find(&self, gram: u32) -> Option<BucketEntries<'a>> {
        let mut idx = bucket_hash(gram) & self.mask;
        for _ in 0..self.table_size {
            let off = self.slot_value(idx);
            if off == EMPTY_SLOT {
                return None;
            }
            let off = off as usize;
            let key = u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap());
            if key == gram {
                let count = u32::from_le_bytes(self.data[off + 4..off + 8].try_into().unwrap());
                return Some(BucketEntries {
                    data: &self.data[off + 8..off + 8 + count as usize * ENTRY_SIZE],
                    count,
                    next: 0,
                });
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }
}

/// Iterator over one bucket's packed pattern references.
pub struct BucketEntries<'a> {
    data: &'a [u8],
    count: u32,
    next: u32,
}

impl BucketEntries<'_> {
    /// Number of patterns in the bucket.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Iterator for BucketEntries<'_> {
    type Item = PatternRef;

    #[inline]
    fn next(&mut self) -> Option<PatternRef> {
        if self.next >= self.count {
            return None;
        }
        let at = self.next as usize * ENTRY_SIZE;
        self.next += 1;
        Some(PatternRef {
            offset: u64::from_le_bytes(self.data[at..at + 8].try_into().unwrap()),
            len: u32::from_le_bytes(self.data[at + 8..at + 12].try_into().unwrap()),
            tail_skips: u32::from_le_bytes(self.data[at + 12..at + 16].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::gram_at;

    fn build_view(table: &SerializedTable) -> BucketIndexView<'_> {
        BucketIndexView::parse(&table.index, &table.data, table.table_size, 1 << 20).unwrap()
    }

    #[test]
    fn test_insert_and_probe() {
        let mut builder = BucketTableBuilder::new();
        let g1 = gram_at(b"hell", 0);
        let g2 = gram_at(b"worl", 0);
        builder.insert(g1, PatternRef { offset: 0, len: 5, tail_skips: 0 });
        builder.insert(g2, PatternRef { offset: 5, len: 5, tail_skips: 0 });
        builder.insert(g1, PatternRef { offset: 10, len: 9, tail_skips: 2 });
        assert_eq!(builder.occupied(), 2);

        builder.sort_buckets();
        let table = builder.serialize();
        let view = build_view(&table);

        let bucket: Vec<_> = view.find(g1).unwrap().collect();
        assert_eq!(bucket.len(), 2);
        // Descending length within the bucket.
        assert_eq!(bucket[0], PatternRef { offset: 10, len: 9, tail_skips: 2 });
        assert_eq!(bucket[1], PatternRef { offset: 0, len: 5, tail_skips: 0 });

        assert_eq!(view.find(g2).unwrap().count(), 1);
        assert!(view.find(gram_at(b"none", 0)).is_none());
    }

    #[test]
    fn test_resize_keeps_all_buckets() {
        let mut builder = BucketTableBuilder::new();
        // Push past the 0.9 load ceiling of the initial 8192 slots.
        let n = 12_000u32;
        for i in 0..n {
            builder.insert(i, PatternRef {
                offset: i as u64 * 8,
                len: 5 + (i % 7),
                tail_skips: 0,
            });
        }
        assert_eq!(builder.occupied(), n as usize);
        assert!(builder.table_size() > INITIAL_TABLE_SIZE);
        assert!(builder.table_size().is_power_of_two());

        builder.sort_buckets();
        let table = builder.serialize();
        let view = build_view(&table);
        for i in 0..n {
            let entries: Vec<_> = view.find(i).unwrap().collect();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].offset, i as u64 * 8);
        }
    }

    #[test]
    fn test_bucket_stats() {
        let mut builder = BucketTableBuilder::new();
        let g = gram_at(b"abcd", 0);
        for i in 0..3 {
            builder.insert(g, PatternRef { offset: i * 16, len: 6, tail_skips: 0 });
        }
        builder.insert(gram_at(b"zzzz", 0), PatternRef { offset: 100, len: 8, tail_skips: 0 });
        let table = builder.serialize();
        assert_eq!(table.occupied, 2);
        assert_eq!(table.min_bucket, 1);
        assert_eq!(table.max_bucket, 3);
    }

    #[test]
    fn test_empty_table_serializes() {
        let builder = BucketTableBuilder::new();
        let table = builder.serialize();
        assert_eq!(table.occupied, 0);
        assert_eq!(table.min_bucket, 0);
        assert_eq!(table.max_bucket, 0);
        assert!(table.data.is_empty());
        let view = build_view(&table);
        assert!(view.find(0x6162_6364).is_none());
    }

    #[test]
    fn test_parse_rejects_bad_offsets() {
        let mut builder = BucketTableBuilder::new();
        builder.insert(gram_at(b"abcd", 0), PatternRef { offset: 0, len: 5, tail_skips: 0 });
        let table = builder.serialize();
        // Truncate the data region out from under the index.
        assert!(BucketIndexView::parse(&table.index, &[], table.table_size, 1 << 20).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let table = BucketTableBuilder::new().serialize();
        let mut index = table.index.clone();
        index[0] = b'?';
        assert!(BucketIndexView::parse(&index, &table.data, table.table_size, 1 << 20).is_err());
    }
}
