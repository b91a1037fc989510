//! Omgmatch - High-Throughput Multi-Pattern Literal Matching
//!
//! Omgmatch compiles a dictionary of byte-string patterns into a compact,
//! memory-mappable artifact (the *compiled store*) and scans byte buffers
//! against it, reporting every occurrence of every pattern as
//! `(offset, length)` records. Matching is two-tiered: patterns of length
//! five and up go through a Bloom-gated hash bucket table keyed on their
//! leading 4-byte gram, while patterns of length one to four use bitmaps
//! and sorted key arrays. Optional normalization (case folding,
//! punctuation stripping, whitespace collapsing) runs identically over the
//! dictionary and the haystack, with offsets mapped back to the original
//! bytes.
//!
//! # Quick Start
//!
//! ```no_run
//! use omgmatch::{Compiler, Matcher, ScanOptions, StoreFlags};
//!
//! // Compile a dictionary into a store.
//! let mut compiler = Compiler::create("patterns.omg", StoreFlags::default())?;
//! compiler.add(b"hello")?;
//! compiler.add(b"world")?;
//! compiler.close()?;
//!
//! // Map the store and scan.
//! let matcher = Matcher::open("patterns.omg")?;
//! let results = matcher.scan(b"say hello world", &ScanOptions::default())?;
//! for hit in results.iter() {
//!     println!("{} @ {}", String::from_utf8_lossy(hit.bytes), hit.offset);
//! }
//! # Ok::<(), omgmatch::MatchError>(())
//! ```
//!
//! Handed a raw dictionary file (one pattern per line), [`Matcher::from`]
//! compiles a temporary store on the fly and cleans it up on drop:
//!
//! ```no_run
//! use omgmatch::{Matcher, ScanOptions};
//!
//! let matcher = Matcher::from("words.txt").case_fold(true).open()?;
//! let results = matcher.scan(b"Scan Me", &ScanOptions::default())?;
//! # Ok::<(), omgmatch::MatchError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Compiled Store Format               │
//! ├──────────────────────────────────────┤
//! │  1. Global header (stats, flags)     │
//! │  2. Pattern store (length ≥ 5)       │
//! │  3. Bloom pre-filter                 │
//! │  4. Hash index + bucket data         │
//! │  5. Short matcher (length 1–4)       │
//! └──────────────────────────────────────┘
//!          ↓ mmap() syscall
//! ┌──────────────────────────────────────┐
//! │  Read-only, shared across scans      │
//! └──────────────────────────────────────┘
//! ```
//!
//! Scans partition the haystack into chunks dispatched to worker threads
//! under a static schedule; per-thread results are merged and radix-sorted
//! into a deterministic order (offset ascending, longest match first at
//! each offset), then the optional `longest_only` / `no_overlap` passes
//! run. Results are bit-reproducible for any legal thread count.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bloom;
pub mod bucket_table;
/// ASCII byte classification tables
pub mod classify;
/// Compiled-store builder
pub mod compiler;
mod dedup;
/// Error types for matcher operations
pub mod error;
/// Compiled-store binary format definitions
pub mod format;
pub mod hashing;
/// Matcher loading and scan orchestration
pub mod matcher;
pub mod mmap;
/// Normalization transform
pub mod normalize;
/// Match records, ordering, and post-filters
pub mod results;
/// Scan options and engine
pub mod scan;
pub mod short_matcher;

pub use crate::compiler::{compile_file, AddOutcome, CompileStats, Compiler};
pub use crate::error::{MatchError, Result};
pub use crate::format::{StoreFlags, StoreHeader};
pub use crate::matcher::{Matcher, MatcherOpener};
pub use crate::results::{Match, ScanHit, ScanResults, ScanStats};
pub use crate::scan::ScanOptions;

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
