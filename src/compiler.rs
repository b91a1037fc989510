//! Compiled-store builder.
//!
//! The compiler owns the sink file for the whole build. Pattern bytes
//! stream straight into the pattern-store region as patterns are added
//! (the region starts immediately after the reserved header, so adds are
//! sequential appends); the index structures stay in memory until
//! `close()`, which serializes them, appends the remaining sections, and
//! finally seeks back to rewrite the real header. An interrupted build
//! leaves the zeroed placeholder header behind, which the loader rejects.

use crate::bloom::BloomBuilder;
use crate::bucket_table::{BucketTableBuilder, PatternRef};
use crate::dedup::{AddOutcome as DedupOutcome, DedupSet};
use crate::error::{MatchError, Result};
use crate::format::{StoreFlags, StoreHeader, FORMAT_VERSION, HEADER_SIZE};
use crate::hashing::gram_at;
use crate::normalize::Transform;
use crate::short_matcher::ShortMatcherBuilder;
use memchr::memchr_iter;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of [`Compiler::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The pattern is new and was recorded.
    Added,
    /// An identical (post-normalization) pattern was already recorded.
    Duplicate,
}

/// Final statistics of a completed compile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompileStats {
    /// Long-path patterns stored (length ≥ 5, deduplicated).
    pub pattern_count: u32,
    /// Short-matcher patterns stored (length 1–4, deduplicated).
    pub short_count: u32,
    /// Duplicate patterns dropped.
    pub duplicates: u64,
    /// Raw pattern bytes accepted before normalization.
    pub input_bytes: u64,
    /// Smallest stored pattern length (0 for an empty store).
    pub smallest_len: u32,
    /// Largest stored pattern length (0 for an empty store).
    pub largest_len: u32,
    /// Index-array length.
    pub table_size: u32,
    /// Occupied bucket count.
    pub occupied_buckets: u32,
    /// Smallest bucket entry count.
    pub min_bucket: u32,
    /// Largest bucket entry count.
    pub max_bucket: u32,
    /// Occupied buckets over table size.
    pub load_factor: f32,
    /// Mean entries per occupied bucket.
    pub avg_bucket: f32,
    /// Bloom filter bit count.
    pub bloom_bits: u32,
    /// Total compiled-store size in bytes.
    pub store_size: u64,
}

/// Streaming builder for a compiled store.
///
/// Single-owner: add patterns one at a time, then `close()`. Dropping a
/// compiler without closing abandons the artifact in its unloadable state.
pub struct Compiler {
    sink: BufWriter<File>,
    path: PathBuf,
    flags: StoreFlags,
    transform: Option<Transform>,
    dedup: DedupSet,
    table: BucketTableBuilder,
    short: ShortMatcherBuilder,
    pattern_bytes: u64,
    pattern_count: u32,
    short_count: u32,
    duplicates: u64,
    input_bytes: u64,
    smallest_len: u32,
    largest_len: u32,
}

impl Compiler {
    /// Open the sink at `path` and reserve header space.
    pub fn create<P: AsRef<Path>>(path: P, flags: StoreFlags) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| MatchError::Io(format!("create {}: {}", path.display(), e)))?;
        let mut sink = BufWriter::new(file);
        sink.write_all(&[0u8; HEADER_SIZE])?;

        Ok(Compiler {
            sink,
            path,
            flags,
            transform: Transform::from_flags(flags),
            dedup: DedupSet::new(),
            table: BucketTableBuilder::new(),
            short: ShortMatcherBuilder::new(),
            pattern_bytes: 0,
            pattern_count: 0,
            short_count: 0,
            duplicates: 0,
            input_bytes: 0,
            smallest_len: u32::MAX,
            largest_len: 0,
        })
    }

    /// The feature flags this store is being compiled with.
    pub fn flags(&self) -> StoreFlags {
        self.flags
    }

    /// Add one pattern.
    ///
    /// The pattern is normalized first when any transform flag is set.
    /// Empty input, input longer than `u32::MAX`, and patterns that
    /// normalize to nothing are `InvalidPattern`. Duplicates are counted
    /// and dropped, never errors.
    pub fn add(&mut self, pattern: &[u8]) -> Result<AddOutcome> {
        if pattern.is_empty() {
            return Err(MatchError::InvalidPattern("empty pattern".to_string()));
        }
        if pattern.len() > u32::MAX as usize {
            return Err(MatchError::InvalidPattern(format!(
                "pattern of {} bytes exceeds the 32-bit length limit",
                pattern.len()
            )));
        }
        self.input_bytes += pattern.len() as u64;

        let normalized_storage;
        let normalized: &[u8] = match &self.transform {
            Some(t) => {
                normalized_storage = t.apply(pattern);
                &normalized_storage
            }
            None => pattern,
        };
        if normalized.is_empty() {
            return Err(MatchError::InvalidPattern(
                "pattern normalizes to nothing".to_string(),
            ));
        }

        if self.dedup.add(normalized) == DedupOutcome::AlreadyPresent {
            self.duplicates += 1;
            return Ok(AddOutcome::Duplicate);
        }

        let len = normalized.len() as u32;
        self.smallest_len = self.smallest_len.min(len);
        self.largest_len = self.largest_len.max(len);

        if normalized.len() <= 4 {
            self.short.add(normalized);
            self.short_count += 1;
        } else {
            let offset = self.pattern_bytes;
            self.sink.write_all(normalized)?;
            self.pattern_bytes += normalized.len() as u64;
            // Remember how much trailing punctuation the transform ate, so
            // scan-time remapping can report a span covering it.
            let tail_skips = match &self.transform {
                Some(t) => t.trailing_skips(pattern),
                None => 0,
            };
            self.table.insert(
                gram_at(normalized, 0),
                PatternRef {
                    offset,
                    len,
                    tail_skips,
                },
            );
            self.pattern_count += 1;
        }
        Ok(AddOutcome::Added)
    }

    /// Build the remaining sections, rewrite the header, and flush.
    pub fn close(mut self) -> Result<CompileStats> {
        let mut bloom = BloomBuilder::new(self.table.occupied());
        for key in self.table.keys() {
            bloom.insert(key);
        }

        self.table.sort_buckets();
        let table = self.table.serialize();
        let bloom_bytes = bloom.serialize();
        let short_bytes = std::mem::take(&mut self.short).finish();

        self.sink.write_all(&bloom_bytes)?;
        self.sink.write_all(&table.index)?;
        self.sink.write_all(&table.data)?;
        let short_matcher_size = match &short_bytes {
            Some(bytes) => {
                self.sink.write_all(bytes)?;
                bytes.len() as u32
            }
            None => 0,
        };

        let (smallest_len, largest_len) = if self.pattern_count == 0 && self.short_count == 0 {
            (0, 0)
        } else {
            (self.smallest_len, self.largest_len)
        };

        let header = StoreHeader {
            version: FORMAT_VERSION,
            flags: self.flags,
            pattern_store_size: self.pattern_bytes,
            pattern_count: self.pattern_count,
            smallest_len,
            largest_len,
            bloom_size: bloom.bit_size() / 8,
            bucket_data_size: table.data.len() as u32,
            table_size: table.table_size,
            occupied_buckets: table.occupied,
            min_bucket: table.min_bucket,
            max_bucket: table.max_bucket,
            short_matcher_size,
            load_factor: table.occupied as f32 / table.table_size as f32,
            avg_bucket: if table.occupied == 0 {
                0.0
            } else {
                self.pattern_count as f32 / table.occupied as f32
            },
        };

        self.sink.seek(SeekFrom::Start(0))?;
        self.sink.write_all(&header.serialize())?;
        self.sink.flush()?;
        self.sink.get_ref().sync_all()?;

        let store_size = header.layout().total_size as u64;
        let stats = CompileStats {
            pattern_count: self.pattern_count,
            short_count: self.short_count,
            duplicates: self.duplicates,
            input_bytes: self.input_bytes,
            smallest_len,
            largest_len,
            table_size: table.table_size,
            occupied_buckets: table.occupied,
            min_bucket: table.min_bucket,
            max_bucket: table.max_bucket,
            load_factor: header.load_factor,
            avg_bucket: header.avg_bucket,
            bloom_bits: bloom.bit_size(),
            store_size,
        };

        debug!(
            path = %self.path.display(),
            patterns = stats.pattern_count,
            short = stats.short_count,
            unique = self.dedup.len(),
            duplicates = stats.duplicates,
            store_size = stats.store_size,
            "compiled store written"
        );
        Ok(stats)
    }
}

/// Compile a dictionary text file into a store at `store_path`.
///
/// One pattern per line, LF or CRLF terminated; a trailing CR is stripped,
/// empty lines are skipped, and bytes need not be UTF-8.
pub fn compile_file<P: AsRef<Path>, Q: AsRef<Path>>(
    dict_path: P,
    store_path: Q,
    flags: StoreFlags,
) -> Result<CompileStats> {
    let dict = std::fs::read(dict_path.as_ref()).map_err(|e| {
        MatchError::Io(format!("read {}: {}", dict_path.as_ref().display(), e))
    })?;

    let mut compiler = Compiler::create(store_path, flags)?;
    let mut line_start = 0usize;
    for nl in memchr_iter(b'\n', &dict).chain(std::iter::once(dict.len())) {
        let mut line = &dict[line_start..nl];
        line_start = nl + 1;
        if let [head @ .., b'\r'] = line {
            line = head;
        }
        if line.is_empty() {
            continue;
        }
        compiler.add(line)?;
    }
    compiler.close()
}
