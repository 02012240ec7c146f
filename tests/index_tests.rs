mod common;

use common::{line, write_destination};
use logship::{FetchError, Query, Span, TimeIndex};
use std::fs;
use tempfile::tempdir;

fn last_ms(index: &TimeIndex) -> Vec<i64> {
    index.files().iter().map(|f| f.span.last_ms).collect()
}

#[test]
fn test_discover_sorts_by_descending_last() {
    let dir = tempdir().unwrap();
    write_destination(dir.path(), "aaaaa", 150, 300, &[line(150, "a")]);
    write_destination(dir.path(), "bbbbb", 1, 100, &[line(1, "b")]);
    write_destination(dir.path(), "ccccc", 290, 400, &[line(290, "c")]);

    let index = TimeIndex::discover(dir.path()).unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(last_ms(&index), vec![400, 300, 100]);
}

#[test]
fn test_malformed_names_are_skipped() {
    let dir = tempdir().unwrap();
    write_destination(dir.path(), "aaaaa", 150, 300, &[line(150, "a")]);
    for name in [
        "README",
        "2024-01-01-00-00:aaaaa:150:300.txt",
        "2024-01-01-00-00:aaaaa:300:150.log",
        "2024-01-01-00-00:aaaaa:0:100.log",
        "2024-01-01-00-00:aaaaa:x:100.log",
        "aaaaa:150:300.log",
        "tmp:abcde.log",
    ] {
        fs::write(dir.path().join(name), "").unwrap();
    }
    fs::create_dir(dir.path().join("2024-01-01-00-00:ddddd:1:2.log")).unwrap();

    let index = TimeIndex::discover(dir.path()).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.files()[0].span, Span::new(150, 300));
}

#[test]
fn test_use_file_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut index = TimeIndex::discover(dir.path()).unwrap();
    assert!(index.is_empty());

    let path = write_destination(dir.path(), "aaaaa", 10, 20, &[line(10, "a")]);
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(index.use_file(name));
    assert!(!index.use_file(name));
    assert_eq!(index.len(), 1);
    assert!(index.has_seen(name));
}

#[test]
fn test_use_file_missing() {
    let dir = tempdir().unwrap();
    let mut index = TimeIndex::new(dir.path());
    assert!(!index.use_file("2024-01-01-00-00:aaaaa:1:2.log"));
    assert!(index.is_empty());
}

#[test]
fn test_incremental_insert_keeps_order() {
    let dir = tempdir().unwrap();
    let mut index = TimeIndex::new(dir.path());
    for (hash, first, last) in [("a", 5, 50), ("b", 1, 10), ("c", 40, 90), ("d", 20, 50)] {
        let path = write_destination(dir.path(), hash, first, last, &[]);
        index.use_file(path.file_name().unwrap().to_str().unwrap());
    }
    assert_eq!(last_ms(&index), vec![90, 50, 50, 10]);
}

#[test]
fn test_select_by_overlap() {
    let dir = tempdir().unwrap();
    write_destination(dir.path(), "aaaaa", 1, 100, &[]);
    write_destination(dir.path(), "bbbbb", 150, 300, &[]);
    write_destination(dir.path(), "ccccc", 290, 400, &[]);
    let index = TimeIndex::discover(dir.path()).unwrap();

    let spans: Vec<Span> = index
        .select(&Query::between(120, 295))
        .into_iter()
        .map(|f| f.span)
        .collect();
    assert_eq!(spans, vec![Span::new(290, 400), Span::new(150, 300)]);

    assert_eq!(index.select(&Query::all()).len(), 3);
    assert_eq!(index.select(&Query::since(401)).len(), 0);
    assert_eq!(index.select(&Query::between(0, 1)).len(), 0);
    // last_ms is inclusive
    assert_eq!(index.select(&Query::since(400)).len(), 1);
}

#[test]
fn test_discover_requires_directory() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing");
    assert!(matches!(
        TimeIndex::discover(&missing),
        Err(FetchError::NotADirectory(_))
    ));
}
