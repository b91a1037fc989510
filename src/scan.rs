//! Per-position scan engine and its worker scheduling.
//!
//! The engine walks every candidate start position in a haystack (or a
//! normalized window of one) and evaluates two independent paths:
//!
//! - **long path**: 4-byte gram → bloom pre-filter → bucket probe → exact
//!   tail compare, for patterns of length ≥ 5
//! - **short path**: bitmap / sorted-array lookups for lengths 4 down to 1
//!
//! Positions are partitioned into fixed-size chunks dispatched to worker
//! threads under a static schedule. Workers share nothing but the
//! read-only haystack and store sections; each owns its result vector and
//! counters, reduced once at the end.

use crate::bloom::BloomView;
use crate::bucket_table::BucketIndexView;
use crate::classify::{is_line_break, is_word};
use crate::error::{MatchError, Result};
use crate::hashing::gram_at;
use crate::results::ScanStats;
use crate::short_matcher::ShortMatcherView;
use serde::{Deserialize, Serialize};

/// Default chunk size in positions when unspecified.
const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Scan configuration.
///
/// All predicates are independent and default to off. `threads == 0`
/// selects the hardware parallelism; `chunk_size == 0` selects the
/// default, and any other value is rounded up to a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Drop matches overlapping an earlier kept match.
    pub no_overlap: bool,
    /// Keep only the longest match at each offset.
    pub longest_only: bool,
    /// Require a wordness transition at the start and a non-word byte after
    /// the end.
    pub word_boundary: bool,
    /// Require a non-word byte (or buffer start) before the match.
    pub word_prefix: bool,
    /// Require a non-word byte (or buffer end) after the match.
    pub word_suffix: bool,
    /// Require the match to start a line.
    pub line_start: bool,
    /// Require the match to end a line.
    pub line_end: bool,
    /// Worker thread count; 0 means hardware parallelism.
    pub threads: i32,
    /// Chunk size in positions; 0 means 4096.
    pub chunk_size: i64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            no_overlap: false,
            longest_only: false,
            word_boundary: false,
            word_prefix: false,
            word_suffix: false,
            line_start: false,
            line_end: false,
            threads: 0,
            chunk_size: 0,
        }
    }
}

impl ScanOptions {
    /// Validate the concurrency knobs, resolving defaults.
    ///
    /// Returns `(threads, chunk_size)` or `InvalidConfig`.
    pub(crate) fn resolve(&self) -> Result<(usize, usize)> {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let threads = match self.threads {
            0 => hw,
            t if t < 0 => {
                return Err(MatchError::InvalidConfig(format!(
                    "thread count {} is negative",
                    t
                )))
            }
            t if t as usize > hw => {
                return Err(MatchError::InvalidConfig(format!(
                    "thread count {} exceeds hardware parallelism {}",
                    t, hw
                )))
            }
            t => t as usize,
        };

        let chunk_size = match self.chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            c if c < 0 => {
                return Err(MatchError::InvalidConfig(format!(
                    "chunk size {} is negative",
                    c
                )))
            }
            c => (c as usize).next_power_of_two(),
        };

        Ok((threads, chunk_size))
    }
}

/// Engine-internal match in scanned-buffer coordinates.
///
/// `tail_skips` is copied from the matched pattern's bucket entry; the
/// windowed remap uses it to bound how far the reported span reaches into
/// source bytes the transform dropped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanMatch {
    pub offset: u64,
    pub length: u32,
    pub tail_skips: u32,
}

/// Borrowed store sections needed by the scan hot path.
#[derive(Clone, Copy)]
pub(crate) struct ScanEngine<'a> {
    pub patterns: &'a [u8],
    pub bloom: BloomView<'a>,
    pub index: BucketIndexView<'a>,
    pub short: Option<ShortMatcherView<'a>>,
    pub smallest_len: u32,
    pub largest_len: u32,
}

impl ScanEngine<'_> {
    /// Scan `haystack` with a static chunk schedule over `threads` workers.
    ///
    /// Offsets in the returned matches are haystack-relative; the caller
    /// rebases them when scanning windows.
    pub(crate) fn scan_chunked(
        &self,
        haystack: &[u8],
        options: &ScanOptions,
        threads: usize,
        chunk_size: usize,
    ) -> (Vec<ScanMatch>, ScanStats) {
        if haystack.is_empty() {
            return (Vec::new(), ScanStats::default());
        }

        let chunk_count = haystack.len().div_ceil(chunk_size);
        let workers = threads.min(chunk_count).max(1);

        if workers == 1 {
            let mut out = Vec::new();
            let mut stats = ScanStats::default();
            for p in 0..haystack.len() {
                self.eval_position(haystack, p, options, &mut out, &mut stats);
            }
            return (out, stats);
        }

        let mut per_thread: Vec<(Vec<ScanMatch>, ScanStats)> = Vec::with_capacity(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|t| {
                    scope.spawn(move || {
                        let mut out = Vec::new();
                        let mut stats = ScanStats::default();
                        let mut ci = t;
                        while ci < chunk_count {
                            let start = ci * chunk_size;
                            let end = (start + chunk_size).min(haystack.len());
                            for p in start..end {
                                self.eval_position(haystack, p, options, &mut out, &mut stats);
                            }
                            ci += workers;
                        }
                        (out, stats)
                    })
                })
                .collect();
            for handle in handles {
                per_thread.push(handle.join().expect("scan worker panicked"));
            }
        });

        let total: usize = per_thread.iter().map(|(v, _)| v.len()).sum();
        let mut matches = Vec::with_capacity(total);
        let mut stats = ScanStats::default();
        for (v, s) in per_thread {
            matches.extend(v);
            stats.merge(&s);
        }
        (matches, stats)
    }

    /// Evaluate one candidate start position.
    #[inline]
    fn eval_position(
        &self,
        haystack: &[u8],
        p: usize,
        options: &ScanOptions,
        out: &mut Vec<ScanMatch>,
        stats: &mut ScanStats,
    ) {
        let n = haystack.len();

        if options.word_boundary {
            // Start gate: the position's wordness must differ from its
            // predecessor's (buffer start counts as non-word).
            let cur = is_word(haystack[p]);
            let prev = p > 0 && is_word(haystack[p - 1]);
            if cur == prev {
                return;
            }
        }

        if self.largest_len >= 5 && p + 4 <= n {
            let gram = gram_at(haystack, p);
            stats.attempts += 1;
            if !self.bloom.query(gram) {
                stats.filtered += 1;
            } else {
                match self.index.find(gram) {
                    None => stats.misses += 1,
                    Some(entries) => {
                        stats.hits += 1;
                        for r in entries {
                            let len = r.len as usize;
                            if p + len > n {
                                continue;
                            }
                            let pat = &self.patterns[r.offset as usize..r.offset as usize + len];
                            stats.comparisons += 1;
                            // The bucket key already matched the leading gram.
                            if haystack[p + 4..p + len] == pat[4..]
                                && passes_filters(haystack, p, len, options)
                            {
                                out.push(ScanMatch {
                                    offset: p as u64,
                                    length: r.len,
                                    tail_skips: r.tail_skips,
                                });
                            }
                        }
                    }
                }
            }
        }

        if self.smallest_len <= 4 {
            if let Some(short) = &self.short {
                // Longest first, so same-position emission order matches
                // the long path's descending-length bucket order.
                if p + 4 <= n && short.has4(gram_at(haystack, p)) && passes_filters(haystack, p, 4, options) {
                    out.push(ScanMatch {
                        offset: p as u64,
                        length: 4,
                        tail_skips: 0,
                    });
                }
                if p + 3 <= n {
                    let key = (haystack[p] as u32) << 16
                        | (haystack[p + 1] as u32) << 8
                        | haystack[p + 2] as u32;
                    if short.has3(key) && passes_filters(haystack, p, 3, options) {
                        out.push(ScanMatch {
                            offset: p as u64,
                            length: 3,
                            tail_skips: 0,
                        });
                    }
                }
                if p + 2 <= n {
                    let key = (haystack[p] as u32) << 8 | haystack[p + 1] as u32;
                    if short.has2(key) && passes_filters(haystack, p, 2, options) {
                        out.push(ScanMatch {
                            offset: p as u64,
                            length: 2,
                            tail_skips: 0,
                        });
                    }
                }
                if short.has1(haystack[p]) && passes_filters(haystack, p, 1, options) {
                    out.push(ScanMatch {
                        offset: p as u64,
                        length: 1,
                        tail_skips: 0,
                    });
                }
            }
        }
    }
}

/// Apply the match-level predicates to a confirmed literal match.
///
/// Absent neighbors at the buffer edges count as non-word bytes and line
/// boundaries.
#[inline]
fn passes_filters(haystack: &[u8], p: usize, len: usize, options: &ScanOptions) -> bool {
    let n = haystack.len();
    let end = p + len;

    if (options.word_boundary || options.word_suffix) && end < n && is_word(haystack[end]) {
        return false;
    }
    if options.word_prefix && p > 0 && is_word(haystack[p - 1]) {
        return false;
    }
    if options.line_start && p > 0 && !is_line_break(haystack[p - 1]) {
        return false;
    }
    if options.line_end && end < n && !is_line_break(haystack[end]) {
        return false;
    }
    true
}
