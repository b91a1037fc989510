//! Memory-mapped file support for compiled stores.
//!
//! The matcher treats a compiled store as a single read-only byte region
//! acquired from a path. This module wraps that acquisition: open the
//! file, map it, and hand out bounds-checked slices. Structural validation
//! of what the bytes mean happens in the loader, not here.
//!
//! # Safety
//!
//! Memory-mapped contents can in principle change underneath a process if
//! another process writes the file. Compiled stores are write-once (the
//! compiler rewrites the header last and never touches the file again), so
//! the mapping is treated as immutable for the lifetime of the handle.

use crate::error::{MatchError, Result};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::Path;

/// A read-only memory-mapped file.
///
/// The mapping is released when the value is dropped. `MmapFile` is
/// `Send + Sync`; the region is never written through.
pub struct MmapFile {
    mmap: Mmap,
    size: usize,
}

impl MmapFile {
    /// Open and map `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            MatchError::Io(format!("open {}: {}", path.as_ref().display(), e))
        })?;
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| {
                MatchError::Mmap(format!("map {}: {}", path.as_ref().display(), e))
            })?
        };
        let size = mmap.len();
        Ok(MmapFile { mmap, size })
    }

    /// Size of the mapped region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The entire mapped region.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// A sub-slice at `offset`, or `None` when it would overrun the region.
    pub fn get_slice(&self, offset: usize, length: usize) -> Option<&[u8]> {
        if offset.checked_add(length)? > self.size {
            return None;
        }
        Some(&self.mmap[offset..offset + length])
    }
}

impl fmt::Debug for MmapFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapFile").field("size", &self.size).finish()
    }
}
