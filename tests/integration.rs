//! End-to-end tests for compile → load → scan correctness
//!
//! These exercise the full pipeline over real temporary files: dictionary
//! intake, the two-tier matching paths, predicate filters, normalization
//! with offset back-mapping, and the result pipeline.

use omgmatch::{compile_file, Compiler, Matcher, ScanOptions, StoreFlags};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn build_store(dir: &Path, patterns: &[&[u8]], flags: StoreFlags) -> PathBuf {
    let path = dir.join("store.omg");
    let mut compiler = Compiler::create(&path, flags).unwrap();
    for p in patterns {
        compiler.add(p).unwrap();
    }
    compiler.close().unwrap();
    path
}

fn scan_tuples(matcher: &Matcher, haystack: &[u8], options: &ScanOptions) -> Vec<(u64, u32, Vec<u8>)> {
    matcher
        .scan(haystack, options)
        .unwrap()
        .iter()
        .map(|hit| (hit.offset, hit.length, hit.bytes.to_vec()))
        .collect()
}

#[test]
fn test_baseline_long_patterns() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"hello", b"world"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"say hello world hellohello", &ScanOptions::default());
    assert_eq!(
        hits,
        vec![
            (4, 5, b"hello".to_vec()),
            (10, 5, b"world".to_vec()),
            (16, 5, b"hello".to_vec()),
            (21, 5, b"hello".to_vec()),
        ]
    );
}

#[test]
fn test_short_and_long_coexist() {
    let dir = tempdir().unwrap();
    let path = build_store(
        dir.path(),
        &[b"a", b"ab", b"abc", b"abcd", b"abcde"],
        StoreFlags::default(),
    );
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"xabcdeY", &ScanOptions::default());
    assert_eq!(
        hits,
        vec![
            (1, 5, b"abcde".to_vec()),
            (1, 4, b"abcd".to_vec()),
            (1, 3, b"abc".to_vec()),
            (1, 2, b"ab".to_vec()),
            (1, 1, b"a".to_vec()),
        ]
    );
}

#[test]
fn test_longest_only_with_no_overlap() {
    let dir = tempdir().unwrap();
    let path = build_store(
        dir.path(),
        &[b"a", b"ab", b"abc", b"abcd", b"abcde"],
        StoreFlags::default(),
    );
    let matcher = Matcher::open(&path).unwrap();

    let options = ScanOptions {
        longest_only: true,
        no_overlap: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, b"xabcdeY", &options);
    assert_eq!(hits, vec![(1, 5, b"abcde".to_vec())]);
}

#[test]
fn test_word_boundary() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"cat"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let options = ScanOptions {
        word_boundary: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, b"the cat catches cats", &options);
    assert_eq!(hits, vec![(4, 3, b"cat".to_vec())]);
}

#[test]
fn test_word_prefix_and_suffix() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"cat"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    // "cat" occurrences: standalone, leading "cats", trailing "tomcat".
    let haystack = b"cat cats tomcat";

    let prefix = ScanOptions {
        word_prefix: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, haystack, &prefix);
    // "tomcat"'s cat is preceded by a word char; the others qualify.
    assert_eq!(
        hits.iter().map(|h| h.0).collect::<Vec<_>>(),
        vec![0, 4]
    );

    let suffix = ScanOptions {
        word_suffix: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, haystack, &suffix);
    // "cats"'s cat is followed by a word char; buffer end accepts.
    assert_eq!(
        hits.iter().map(|h| h.0).collect::<Vec<_>>(),
        vec![0, 12]
    );
}

#[test]
fn test_line_anchors() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"end", b"start"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let haystack = b"start of a line\nmiddle\nthe end";

    let options = ScanOptions {
        line_start: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, haystack, &options);
    assert_eq!(hits, vec![(0, 5, b"start".to_vec())]);

    let options = ScanOptions {
        line_end: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, haystack, &options);
    assert_eq!(hits, vec![(27, 3, b"end".to_vec())]);
}

#[test]
fn test_line_anchors_with_crlf() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"alpha", b"omega"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let haystack = b"omega\r\nalpha tail";
    let options = ScanOptions {
        line_start: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, haystack, &options);
    assert_eq!(
        hits,
        vec![(0, 5, b"omega".to_vec()), (7, 5, b"alpha".to_vec())]
    );

    let options = ScanOptions {
        line_end: true,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, haystack, &options);
    // "omega" ends right before the CR.
    assert_eq!(hits, vec![(0, 5, b"omega".to_vec())]);
}

#[test]
fn test_normalization_with_backmapping() {
    let dir = tempdir().unwrap();
    let flags = StoreFlags {
        case_fold: true,
        ignore_punct: true,
        elide_whitespace: true,
    };
    let path = build_store(dir.path(), &[b"Hello, World!"], flags);
    let matcher = Matcher::open(&path).unwrap();

    let haystack = b"Say: HELLO   world!!! please";
    let hits = scan_tuples(&matcher, haystack, &ScanOptions::default());
    assert_eq!(hits.len(), 1, "expected exactly one match, got {hits:?}");

    let (offset, length, bytes) = &hits[0];
    // The reported span starts at the H and ends at the trailing !, the
    // one the pattern itself carried before the transform stripped it.
    assert_eq!(*offset, 5);
    assert_eq!(bytes, b"HELLO   world!");
    assert_eq!(*length, 14);
}

#[test]
fn test_backmapping_without_trailing_pattern_punct() {
    let dir = tempdir().unwrap();
    let flags = StoreFlags {
        case_fold: true,
        ignore_punct: true,
        elide_whitespace: true,
    };
    // No trailing punctuation in the pattern, so the span ends at the d
    // even when the haystack piles punctuation after it.
    let path = build_store(dir.path(), &[b"Hello, World"], flags);
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"Say: HELLO   world!!! please", &ScanOptions::default());
    assert_eq!(hits.len(), 1);
    let (offset, length, bytes) = &hits[0];
    assert_eq!(*offset, 5);
    assert_eq!(bytes, b"HELLO   world");
    assert_eq!(*length, 13);
}

#[test]
fn test_backmapping_trailing_punct_run() {
    let dir = tempdir().unwrap();
    let flags = StoreFlags {
        case_fold: true,
        ignore_punct: true,
        elide_whitespace: true,
    };
    // Two elided bang bytes in the pattern claim up to two from the
    // haystack, never the whole run.
    let path = build_store(dir.path(), &[b"wowee!!"], flags);
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"so wowee!!!! indeed", &ScanOptions::default());
    assert_eq!(hits.len(), 1);
    let (offset, _, bytes) = &hits[0];
    assert_eq!(*offset, 3);
    assert_eq!(bytes, b"wowee!!");
}

#[test]
fn test_case_fold_only_keeps_exact_offsets() {
    let dir = tempdir().unwrap();
    let flags = StoreFlags {
        case_fold: true,
        ..Default::default()
    };
    let path = build_store(dir.path(), &[b"NeedLe"], flags);
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"xx needle YY NEEDLE", &ScanOptions::default());
    assert_eq!(
        hits,
        vec![
            (3, 6, b"needle".to_vec()),
            (13, 6, b"NEEDLE".to_vec()),
        ]
    );
}

#[test]
fn test_duplicate_patterns_report_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.omg");
    let mut compiler = Compiler::create(&path, StoreFlags::default()).unwrap();
    compiler.add(b"repeat").unwrap();
    compiler.add(b"repeat").unwrap();
    compiler.add(b"repeat").unwrap();
    let stats = compiler.close().unwrap();
    assert_eq!(stats.duplicates, 2);

    let matcher = Matcher::open(&path).unwrap();
    let hits = scan_tuples(&matcher, b"repeat repeat", &ScanOptions::default());
    assert_eq!(hits.len(), 2);
}

#[test]
fn test_no_partial_match_at_buffer_end() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"hello"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"say hell", &ScanOptions::default());
    assert!(hits.is_empty());
}

#[test]
fn test_matches_across_chunk_boundaries() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"boundary"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    // Tiny chunks force the pattern to straddle many chunk edges.
    let mut haystack = Vec::new();
    for i in 0..50 {
        haystack.extend_from_slice(&vec![b'.'; i % 7]);
        haystack.extend_from_slice(b"boundary");
    }
    let options = ScanOptions {
        chunk_size: 8,
        ..Default::default()
    };
    let hits = scan_tuples(&matcher, &haystack, &options);
    assert_eq!(hits.len(), 50);
    for (offset, length, bytes) in hits {
        assert_eq!(length, 8);
        assert_eq!(bytes, b"boundary");
        assert_eq!(
            &haystack[offset as usize..offset as usize + 8],
            b"boundary"
        );
    }
}

#[test]
fn test_thread_count_determinism() {
    let dir = tempdir().unwrap();
    let path = build_store(
        dir.path(),
        &[b"ab", b"abc", b"abcab", b"cabab", b"b"],
        StoreFlags::default(),
    );
    let matcher = Matcher::open(&path).unwrap();

    let haystack: Vec<u8> = b"abcababcababcababab".repeat(997);
    let hw = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    let baseline = matcher
        .scan(&haystack, &ScanOptions { threads: 1, chunk_size: 64, ..Default::default() })
        .unwrap();
    for threads in 2..=hw.min(4) {
        let options = ScanOptions {
            threads: threads as i32,
            chunk_size: 64,
            ..Default::default()
        };
        let results = matcher.scan(&haystack, &options).unwrap();
        assert_eq!(
            results.matches(),
            baseline.matches(),
            "thread count {threads} changed the result set"
        );
        assert_eq!(results.stats(), baseline.stats());
    }
}

#[test]
fn test_scan_stats_accounting() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"hello"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let results = matcher.scan(b"hello hello", &ScanOptions::default()).unwrap();
    let stats = results.stats();
    // Every position with 4 bytes left forms a gram.
    assert_eq!(stats.attempts, 8);
    assert_eq!(stats.hits, 2);
    assert!(stats.comparisons >= 2);
    assert_eq!(stats.filtered + stats.misses + stats.hits, stats.attempts);
}

#[test]
fn test_compile_file_to_scan() {
    let dir = tempdir().unwrap();
    let dict = dir.path().join("dict.txt");
    std::fs::write(&dict, b"hello\r\nworld\n\nab\n").unwrap();
    let store = dir.path().join("dict.omg");
    let stats = compile_file(&dict, &store, StoreFlags::default()).unwrap();
    assert_eq!(stats.pattern_count, 2);
    assert_eq!(stats.short_count, 1);

    let matcher = Matcher::open(&store).unwrap();
    let hits = scan_tuples(&matcher, b"ab hello", &ScanOptions::default());
    assert_eq!(
        hits.iter().map(|h| (h.0, h.1)).collect::<Vec<_>>(),
        vec![(0, 2), (3, 5)]
    );
}

#[test]
fn test_opener_on_raw_dictionary() {
    let dir = tempdir().unwrap();
    let dict = dir.path().join("words.txt");
    std::fs::write(&dict, b"Needle\n").unwrap();

    let matcher = Matcher::from(&dict).case_fold(true).open().unwrap();
    let hits = scan_tuples(&matcher, b"a NEEDLE here", &ScanOptions::default());
    assert_eq!(hits, vec![(2, 6, b"NEEDLE".to_vec())]);
}

#[test]
fn test_word_boundary_at_buffer_edges() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"edge"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let options = ScanOptions {
        word_boundary: true,
        ..Default::default()
    };
    // Buffer start counts as non-word, buffer end counts as non-word.
    let hits = scan_tuples(&matcher, b"edge", &options);
    assert_eq!(hits, vec![(0, 4, b"edge".to_vec())]);

    let hits = scan_tuples(&matcher, b"edges", &options);
    assert!(hits.is_empty());
}

#[test]
fn test_invalid_config_surfaces() {
    let dir = tempdir().unwrap();
    let path = build_store(dir.path(), &[b"hello"], StoreFlags::default());
    let matcher = Matcher::open(&path).unwrap();

    let options = ScanOptions {
        threads: -2,
        ..Default::default()
    };
    assert!(matcher.scan(b"x", &options).is_err());

    let options = ScanOptions {
        chunk_size: -1,
        ..Default::default()
    };
    assert!(matcher.scan(b"x", &options).is_err());
}

#[test]
fn test_overlapping_results_ordering() {
    let dir = tempdir().unwrap();
    let path = build_store(
        dir.path(),
        &[b"aaaa", b"aaaaa", b"aaaaaa"],
        StoreFlags::default(),
    );
    let matcher = Matcher::open(&path).unwrap();

    let hits = scan_tuples(&matcher, b"aaaaaaa", &ScanOptions::default());
    // Offsets ascend; lengths descend within an offset.
    let mut prev: Option<(u64, u32)> = None;
    for (offset, length, _) in &hits {
        if let Some((po, pl)) = prev {
            assert!(po <= *offset);
            if po == *offset {
                assert!(pl > *length, "lengths must descend at equal offsets");
            }
        }
        prev = Some((*offset, *length));
    }
    // Spot checks: longest at 0 and at 1.
    assert!(hits.contains(&(0, 6, b"aaaaaa".to_vec())));
    assert!(hits.contains(&(1, 6, b"aaaaaa".to_vec())));
    assert!(hits.contains(&(3, 4, b"aaaa".to_vec())));
}
