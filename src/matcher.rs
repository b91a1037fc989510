//! Loading compiled stores and running scans against them.
//!
//! A [`Matcher`] is a validated, read-only view over a memory-mapped
//! compiled store. Opening walks the section layout once, checking every
//! magic and size before any scan runs; after that the mapping is never
//! written and any number of scans may share the matcher across threads.
//!
//! [`Matcher::from`] adds the convenience path: handed a raw dictionary
//! file instead of a compiled store, it compiles to a uniquely named
//! temporary artifact first and deletes it again when the matcher drops.

use crate::compiler::compile_file;
use crate::error::{MatchError, Result};
use crate::format::{StoreFlags, StoreHeader};
use crate::mmap::MmapFile;
use crate::normalize::{NormalizedBuf, Transform};
use crate::results::{
    radix_sort, retain_longest_only, retain_no_overlap, Match, ScanResults, ScanStats,
};
use crate::scan::{ScanEngine, ScanOptions};
use crate::short_matcher::ShortMatcherView;
use crate::bloom::BloomView;
use crate::bucket_table::BucketIndexView;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Normalization window size over source bytes.
const WINDOW_SIZE: usize = 4 << 20;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A loaded, immutable compiled store ready for scanning.
pub struct Matcher {
    mmap: MmapFile,
    header: StoreHeader,
    temp_path: Option<PathBuf>,
}

impl Matcher {
    /// Open and validate an existing compiled store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mmap = MmapFile::open(path.as_ref())?;
        let header = StoreHeader::parse(mmap.as_slice())?;

        // Guard the one 64-bit size before layout arithmetic runs on it.
        if header.pattern_store_size > mmap.size() as u64 {
            return Err(MatchError::InvalidFormat(format!(
                "pattern store of {} bytes exceeds the {}-byte file",
                header.pattern_store_size,
                mmap.size()
            )));
        }

        let layout = header.layout();
        if layout.total_size != mmap.size() {
            return Err(MatchError::InvalidFormat(format!(
                "store is {} bytes but sections end at {}",
                mmap.size(),
                layout.total_size
            )));
        }
        if (1..=4).contains(&header.smallest_len) && header.short_matcher_size == 0 {
            return Err(MatchError::InvalidFormat(
                "smallest length needs a short matcher but the section is absent".to_string(),
            ));
        }
        if header.pattern_count > 0 && header.largest_len < 5 {
            return Err(MatchError::InvalidFormat(
                "stored long patterns but largest length below 5".to_string(),
            ));
        }

        let matcher = Matcher {
            mmap,
            header,
            temp_path: None,
        };
        // Section magics and internal invariants (sorted short keys, bucket
        // record bounds) are checked up front, not on the scan path.
        matcher.engine()?;

        debug!(
            path = %path.as_ref().display(),
            patterns = header.pattern_count,
            table_size = header.table_size,
            store_size = layout.total_size,
            "compiled store loaded"
        );
        Ok(matcher)
    }

    /// Start an opener that accepts either a compiled store or a raw
    /// dictionary file.
    pub fn from<P: Into<PathBuf>>(path: P) -> MatcherOpener {
        MatcherOpener {
            path: path.into(),
            flags: StoreFlags::default(),
        }
    }

    /// The parsed global header.
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Normalization flags baked into the store.
    pub fn flags(&self) -> StoreFlags {
        self.header.flags
    }

    /// Total stored patterns, long and short.
    pub fn pattern_count(&self) -> u32 {
        let short = match self.short_view() {
            Ok(Some(view)) => {
                let (l1, l2, l3, l4) = view.counts();
                l1 + l2 + l3 + l4
            }
            _ => 0,
        };
        self.header.pattern_count + short
    }

    /// Smallest stored pattern length (post-normalization).
    pub fn smallest_len(&self) -> u32 {
        self.header.smallest_len
    }

    /// Largest stored pattern length (post-normalization).
    pub fn largest_len(&self) -> u32 {
        self.header.largest_len
    }

    /// Scan `haystack`, returning matches in deterministic order
    /// (offset ascending, longest first at equal offsets).
    pub fn scan<'h>(&self, haystack: &'h [u8], options: &ScanOptions) -> Result<ScanResults<'h>> {
        let (threads, chunk_size) = options.resolve()?;
        let engine = self.engine()?;

        let (mut matches, stats) = match Transform::from_flags(self.header.flags) {
            None => {
                let (raw, stats) = engine.scan_chunked(haystack, options, threads, chunk_size);
                let matches = raw
                    .into_iter()
                    .map(|m| Match {
                        offset: m.offset,
                        length: m.length,
                    })
                    .collect();
                (matches, stats)
            }
            Some(transform) => {
                self.scan_windowed(&engine, &transform, haystack, options, threads, chunk_size)
            }
        };

        radix_sort(&mut matches);
        if options.longest_only {
            retain_longest_only(&mut matches);
        }
        if options.no_overlap {
            retain_no_overlap(&mut matches);
        }
        Ok(ScanResults::new(haystack, matches, stats))
    }

    /// Windowed scan under an active transform: normalize 4 MiB source
    /// windows (plus trailing overlap), scan the normalized bytes, and
    /// remap results into original coordinates.
    fn scan_windowed(
        &self,
        engine: &ScanEngine<'_>,
        transform: &Transform,
        haystack: &[u8],
        options: &ScanOptions,
        threads: usize,
        chunk_size: usize,
    ) -> (Vec<Match>, ScanStats) {
        // Overlap keeps matches that straddle a window boundary in
        // normalized space findable from the window that owns their start.
        let overlap = self.header.largest_len.saturating_sub(1) as usize;
        let want_backmap = transform.needs_backmap();

        let mut all = Vec::new();
        let mut stats = ScanStats::default();
        let mut buf = NormalizedBuf::new();

        let mut base = 0usize;
        while base < haystack.len() {
            let win_end = (base + WINDOW_SIZE).min(haystack.len());
            let src_end = (win_end + overlap).min(haystack.len());
            let src = &haystack[base..src_end];

            transform.apply_into(src, want_backmap, &mut buf);
            let (win_matches, win_stats) =
                engine.scan_chunked(&buf.bytes, options, threads, chunk_size);
            stats.merge(&win_stats);

            for m in win_matches {
                let (start_rel, length) = if want_backmap {
                    let p = m.offset as usize;
                    let start_rel = buf.backmap[p] as usize;
                    let mut end_rel = buf.backmap[p + m.length as usize - 1] as usize;
                    // The reported span also covers the trailing source
                    // bytes the pattern itself lost to the transform, and
                    // no more than that.
                    let mut budget = m.tail_skips;
                    while budget > 0 && end_rel + 1 < src.len() && transform.is_skip(src[end_rel + 1])
                    {
                        end_rel += 1;
                        budget -= 1;
                    }
                    (start_rel, (end_rel - start_rel + 1) as u32)
                } else {
                    (m.offset as usize, m.length)
                };

                let start_abs = base + start_rel;
                if start_abs < win_end {
                    all.push(Match {
                        offset: start_abs as u64,
                        length,
                    });
                }
            }
            base = win_end;
        }
        (all, stats)
    }

    /// Lay the scan-time section views over the mapping.
    fn engine(&self) -> Result<ScanEngine<'_>> {
        let buf = self.mmap.as_slice();
        let layout = self.header.layout();

        let patterns = &buf[layout.pattern_store..layout.bloom];

        let bloom_section = &buf[layout.bloom..layout.index];
        let (bloom, consumed) = BloomView::parse(bloom_section)?;
        if consumed != bloom_section.len() {
            return Err(MatchError::InvalidFormat(format!(
                "bloom section is {} bytes but header claims {}",
                consumed,
                bloom_section.len()
            )));
        }

        let index = BucketIndexView::parse(
            &buf[layout.index..layout.bucket_data],
            &buf[layout.bucket_data..layout.short],
            self.header.table_size,
            self.header.pattern_store_size,
        )?;

        let short = self.short_view()?;

        Ok(ScanEngine {
            patterns,
            bloom,
            index,
            short,
            smallest_len: self.header.smallest_len,
            largest_len: self.header.largest_len,
        })
    }

    fn short_view(&self) -> Result<Option<ShortMatcherView<'_>>> {
        if self.header.short_matcher_size == 0 {
            return Ok(None);
        }
        let layout = self.header.layout();
        let section = &self.mmap.as_slice()[layout.short..layout.total_size];
        Ok(Some(ShortMatcherView::parse(section)?))
    }
}

impl Drop for Matcher {
    fn drop(&mut self) {
        if let Some(path) = &self.temp_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("patterns", &self.header.pattern_count)
            .field("flags", &self.header.flags)
            .field("store_size", &self.mmap.size())
            .finish()
    }
}

/// Builder-style opener accepting compiled stores or raw dictionaries.
///
/// The transform flags only apply when the input turns out to be a raw
/// dictionary; a compiled store already carries its own.
pub struct MatcherOpener {
    path: PathBuf,
    flags: StoreFlags,
}

impl MatcherOpener {
    /// Fold ASCII case when compiling a raw dictionary.
    pub fn case_fold(mut self, yes: bool) -> Self {
        self.flags.case_fold = yes;
        self
    }

    /// Strip punctuation when compiling a raw dictionary.
    pub fn ignore_punct(mut self, yes: bool) -> Self {
        self.flags.ignore_punct = yes;
        self
    }

    /// Collapse whitespace runs when compiling a raw dictionary.
    pub fn elide_whitespace(mut self, yes: bool) -> Self {
        self.flags.elide_whitespace = yes;
        self
    }

    /// Open the input, compiling it first if it is not a compiled store.
    pub fn open(self) -> Result<Matcher> {
        if sniff_store_magic(&self.path)? {
            return Matcher::open(&self.path);
        }

        let temp = std::env::temp_dir().join(format!(
            "omgmatch-{}-{}.omg",
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        debug!(
            dict = %self.path.display(),
            temp = %temp.display(),
            "compiling raw dictionary to temporary store"
        );

        if let Err(e) = compile_file(&self.path, &temp, self.flags) {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
        match Matcher::open(&temp) {
            Ok(mut matcher) => {
                matcher.temp_path = Some(temp);
                Ok(matcher)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                Err(e)
            }
        }
    }
}

/// True if the file starts with the compiled-store magic.
fn sniff_store_magic(path: &Path) -> Result<bool> {
    let mut file = File::open(path)
        .map_err(|e| MatchError::Io(format!("open {}: {}", path.display(), e)))?;
    let mut magic = [0u8; 8];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == crate::format::STORE_MAGIC),
        // Too small to be a store; treat as dictionary input.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(MatchError::Io(format!("read {}: {}", path.display(), e))),
    }
}
