//! Match records, deterministic ordering, and the post-filter passes.
//!
//! Worker threads emit matches in chunk order with no cross-thread
//! coordination, so the merged vector arrives in an arbitrary interleaving.
//! An LSD radix sort then imposes the one deterministic order the rest of
//! the pipeline depends on: offset ascending, length descending at equal
//! offsets. Both post-filters are single linear passes over that order.

use serde::{Deserialize, Serialize};

/// A single match in haystack coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Byte offset of the first matched byte in the original haystack.
    pub offset: u64,
    /// Match length in original-haystack bytes.
    pub length: u32,
}

/// A match with its haystack bytes attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanHit<'h> {
    /// Byte offset of the first matched byte.
    pub offset: u64,
    /// Match length in bytes.
    pub length: u32,
    /// The matched bytes, borrowed from the haystack.
    pub bytes: &'h [u8],
}

/// Counters reduced from all scan workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Candidate positions where the long path formed a gram.
    pub attempts: u64,
    /// Candidates rejected by the bloom pre-filter.
    pub filtered: u64,
    /// Bloom-passing candidates absent from the bucket index.
    pub misses: u64,
    /// Candidates whose gram found an occupied bucket.
    pub hits: u64,
    /// Candidate patterns whose bytes were compared.
    pub comparisons: u64,
}

impl ScanStats {
    /// Fold another worker's counters into this one.
    pub fn merge(&mut self, other: &ScanStats) {
        self.attempts += other.attempts;
        self.filtered += other.filtered;
        self.misses += other.misses;
        self.hits += other.hits;
        self.comparisons += other.comparisons;
    }
}

/// Ordered scan output borrowing the haystack.
pub struct ScanResults<'h> {
    haystack: &'h [u8],
    matches: Vec<Match>,
    stats: ScanStats,
}

impl<'h> ScanResults<'h> {
    pub(crate) fn new(haystack: &'h [u8], matches: Vec<Match>, stats: ScanStats) -> Self {
        ScanResults {
            haystack,
            matches,
            stats,
        }
    }

    /// Number of matches.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// True when nothing matched.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// The ordered match records without haystack bytes.
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Reduced scan counters.
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Iterate matches with their haystack bytes.
    pub fn iter(&self) -> impl Iterator<Item = ScanHit<'h>> + '_ {
        let haystack = self.haystack;
        self.matches.iter().map(move |m| ScanHit {
            offset: m.offset,
            length: m.length,
            bytes: &haystack[m.offset as usize..m.offset as usize + m.length as usize],
        })
    }
}

/// Sort matches by (offset ascending, length descending).
///
/// LSD radix over 8-bit digits: low-significance passes over the inverted
/// length first, then over the offset bytes. Passes whose digit column is
/// uniform across the input are skipped outright, which collapses the
/// offset passes above the haystack size to nothing.
pub fn radix_sort(matches: &mut Vec<Match>) {
    if matches.len() < 2 {
        return;
    }
    let mut scratch = matches.clone();
    let mut src_is_primary = true;
    for pass in 0..12u32 {
        let moved = if src_is_primary {
            radix_pass(matches.as_slice(), scratch.as_mut_slice(), pass)
        } else {
            radix_pass(scratch.as_slice(), matches.as_mut_slice(), pass)
        };
        if moved {
            src_is_primary = !src_is_primary;
        }
    }
    if !src_is_primary {
        matches.copy_from_slice(&scratch);
    }
}

/// One counting pass over an 8-bit digit column.
///
/// Returns false without touching `dst` when the column is uniform across
/// the input (the order cannot change).
fn radix_pass(src: &[Match], dst: &mut [Match], pass: u32) -> bool {
    let digit = |m: &Match| -> usize {
        if pass < 4 {
            ((!m.length) >> (8 * pass)) as u8 as usize
        } else {
            (m.offset >> (8 * (pass - 4))) as u8 as usize
        }
    };

    let mut counts = [0usize; 256];
    for m in src {
        counts[digit(m)] += 1;
    }
    if counts.iter().any(|&c| c == src.len()) {
        return false;
    }

    let mut positions = [0usize; 256];
    let mut running = 0;
    for (i, &c) in counts.iter().enumerate() {
        positions[i] = running;
        running += c;
    }
    for m in src {
        let d = digit(m);
        dst[positions[d]] = *m;
        positions[d] += 1;
    }
    true
}

/// Keep only the first (longest) match at each offset.
///
/// Precondition: sorted by [`radix_sort`], so equal offsets are adjacent
/// with the longest first.
pub fn retain_longest_only(matches: &mut Vec<Match>) {
    let mut kept_offset = None;
    matches.retain(|m| {
        if kept_offset == Some(m.offset) {
            false
        } else {
            kept_offset = Some(m.offset);
            true
        }
    });
}

/// Keep only matches starting at or after the previous kept match's end.
///
/// Precondition: sorted by [`radix_sort`].
pub fn retain_no_overlap(matches: &mut Vec<Match>) {
    let mut next_free = 0u64;
    matches.retain(|m| {
        if m.offset >= next_free {
            next_free = m.offset + m.length as u64;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(offset: u64, length: u32) -> Match {
        Match { offset, length }
    }

    #[test]
    fn test_radix_sort_order() {
        let mut matches = vec![m(10, 5), m(0, 2), m(10, 9), m(3, 7), m(0, 8)];
        radix_sort(&mut matches);
        assert_eq!(
            matches,
            vec![m(0, 8), m(0, 2), m(3, 7), m(10, 9), m(10, 5)]
        );
    }

    #[test]
    fn test_radix_sort_matches_comparison_sort() {
        // Deterministic pseudo-random input without rand in unit scope.
        let mut state = 0x1234_5678_9abc_def0u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let mut matches: Vec<Match> = (0..10_000)
            .map(|_| m(next() % 100_000, (next() % 64 + 1) as u32))
            .collect();
        let mut expected = matches.clone();
        expected.sort_by(|a, b| a.offset.cmp(&b.offset).then(b.length.cmp(&a.length)));
        radix_sort(&mut matches);
        assert_eq!(matches, expected);
    }

    #[test]
    fn test_radix_sort_large_offsets() {
        let mut matches = vec![m(u64::from(u32::MAX) + 10, 3), m(5, 3), m(u64::from(u32::MAX) + 2, 3)];
        radix_sort(&mut matches);
        assert_eq!(matches[0].offset, 5);
        assert_eq!(matches[1].offset, u64::from(u32::MAX) + 2);
        assert_eq!(matches[2].offset, u64::from(u32::MAX) + 10);
    }

    #[test]
    fn test_radix_sort_trivial_inputs() {
        let mut empty: Vec<Match> = Vec::new();
        radix_sort(&mut empty);
        assert!(empty.is_empty());
        let mut one = vec![m(7, 3)];
        radix_sort(&mut one);
        assert_eq!(one, vec![m(7, 3)]);
    }

    #[test]
    fn test_longest_only() {
        let mut matches = vec![m(1, 5), m(1, 4), m(1, 3), m(2, 2), m(5, 9), m(5, 1)];
        retain_longest_only(&mut matches);
        assert_eq!(matches, vec![m(1, 5), m(2, 2), m(5, 9)]);
    }

    #[test]
    fn test_no_overlap() {
        let mut matches = vec![m(0, 5), m(3, 2), m(5, 2), m(6, 1), m(9, 4)];
        retain_no_overlap(&mut matches);
        assert_eq!(matches, vec![m(0, 5), m(5, 2), m(9, 4)]);
    }

    #[test]
    fn test_longest_then_no_overlap_compose() {
        let mut matches = vec![m(1, 5), m(1, 4), m(1, 3), m(1, 2), m(1, 1)];
        retain_longest_only(&mut matches);
        retain_no_overlap(&mut matches);
        assert_eq!(matches, vec![m(1, 5)]);
    }

    #[test]
    fn test_results_iteration() {
        let haystack = b"say hello world";
        let results = ScanResults::new(
            haystack,
            vec![m(4, 5), m(10, 5)],
            ScanStats::default(),
        );
        let hits: Vec<_> = results.iter().collect();
        assert_eq!(hits[0].bytes, b"hello");
        assert_eq!(hits[1].bytes, b"world");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_stats_merge() {
        let mut a = ScanStats {
            attempts: 10,
            filtered: 5,
            misses: 2,
            hits: 3,
            comparisons: 7,
        };
        let b = ScanStats {
            attempts: 1,
            filtered: 1,
            misses: 1,
            hits: 0,
            comparisons: 2,
        };
        a.merge(&b);
        assert_eq!(a.attempts, 11);
        assert_eq!(a.comparisons, 9);
        assert_eq!(a.hits, 3);
    }
}
