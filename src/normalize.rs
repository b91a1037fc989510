//! Byte-level normalization transform.
//!
//! When a store carries any of the case-fold / ignore-punctuation /
//! elide-whitespace flags, both the dictionary patterns (at compile time)
//! and the haystack (at scan time, in windows) are rewritten into a
//! canonical space before matching. A single 256-entry action table covers
//! every input byte:
//!
//! - `Skip`: the byte produces no output (stripped punctuation)
//! - `ElideRun`: a run of such bytes produces exactly one space
//! - `Emit(b)`: the byte is emitted, possibly folded to uppercase
//!
//! The optional back-map records, per output byte, the source index that
//! produced it; the scan wrapper uses it to report offsets in original
//! haystack coordinates.

use crate::classify::{is_punct, is_space};
use crate::format::StoreFlags;

/// Per-byte transform action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Discard the byte.
    Skip,
    /// Emit one space for a whole run of such bytes.
    ElideRun,
    /// Emit the given byte.
    Emit(u8),
}

/// A compiled normalization transform.
pub struct Transform {
    table: [Action; 256],
    elides: bool,
}

/// Reusable output of a transform application.
///
/// The buffers grow to the high-water mark of the windows pushed through
/// them and are recycled across windows.
#[derive(Default)]
pub struct NormalizedBuf {
    /// Normalized output bytes.
    pub bytes: Vec<u8>,
    /// Source index that produced each output byte (empty when unrequested).
    pub backmap: Vec<u32>,
}

impl NormalizedBuf {
    /// Create empty buffers.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform {
    /// Build the action table for the given feature flags.
    ///
    /// Returns `None` when no flag is set (matching then runs over raw
    /// bytes and no windowed rewrite happens at all).
    pub fn from_flags(flags: StoreFlags) -> Option<Self> {
        if !flags.any() {
            return None;
        }
        let mut table = [Action::Emit(0); 256];
        for b in 0..=255u8 {
            table[b as usize] = if flags.ignore_punct && is_punct(b) {
                Action::Skip
            } else if flags.elide_whitespace && is_space(b) {
                Action::ElideRun
            } else if flags.case_fold && b.is_ascii_lowercase() {
                Action::Emit(b.to_ascii_uppercase())
            } else {
                Action::Emit(b)
            };
        }
        Some(Transform {
            table,
            elides: flags.elide_whitespace,
        })
    }

    /// True if the transform needs a back-map to recover source offsets
    /// (any byte-dropping action is in play).
    pub fn needs_backmap(&self) -> bool {
        self.table.iter().any(|a| !matches!(a, Action::Emit(_)))
    }

    /// True if `b` is discarded outright by this transform.
    #[inline(always)]
    pub fn is_skip(&self, b: u8) -> bool {
        matches!(self.table[b as usize], Action::Skip)
    }

    /// Count the consecutive bytes at the end of `src` this transform
    /// discards.
    ///
    /// The compiler records this per pattern so matches can report spans
    /// covering the punctuation the pattern itself lost.
    pub fn trailing_skips(&self, src: &[u8]) -> u32 {
        src.iter().rev().take_while(|&&b| self.is_skip(b)).count() as u32
    }

    /// Normalize `src` into `out`, optionally recording the back-map.
    ///
    /// A trailing elided space is trimmed from the output.
    pub fn apply_into(&self, src: &[u8], want_backmap: bool, out: &mut NormalizedBuf) {
        out.bytes.clear();
        out.backmap.clear();
        let mut in_run = false;

        for (i, &b) in src.iter().enumerate() {
            match self.table[b as usize] {
                Action::Skip => {}
                Action::ElideRun => {
                    if !in_run {
                        out.bytes.push(b' ');
                        if want_backmap {
                            out.backmap.push(i as u32);
                        }
                        in_run = true;
                    }
                }
                Action::Emit(e) => {
                    out.bytes.push(e);
                    if want_backmap {
                        out.backmap.push(i as u32);
                    }
                    in_run = false;
                }
            }
        }

        if self.elides && out.bytes.last() == Some(&b' ') {
            out.bytes.pop();
            if want_backmap {
                out.backmap.pop();
            }
        }
    }

    /// Normalize `src` into a fresh buffer without a back-map.
    pub fn apply(&self, src: &[u8]) -> Vec<u8> {
        let mut out = NormalizedBuf::new();
        self.apply_into(src, false, &mut out);
        out.bytes
    }
}
