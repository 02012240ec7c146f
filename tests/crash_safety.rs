mod common;

use common::{NOW, config_in, destination_files, file_names, line, ms_of, open_storer};
use logship::naming::parse_destination_name;
use logship::{Span, StorerConfig};
use std::fs;
use std::io::Write;
use tempfile::tempdir;

fn leave_intermediate(config: &StorerConfig, name: &str, content: &str) {
    let dir = config.intermediate_dir();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

/// A writer that died mid-file left its intermediate file behind. Every
/// entry in it ends up in exactly one destination file and the leftover
/// is removed.
#[test]
fn test_replay_leftover_intermediate() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let content = [line(1, "a"), line(5, "b"), line(3, "c")].join("\n") + "\n";
    leave_intermediate(&config, "tmp:abcde.log", &content);

    let (storer, _clock) = open_storer(config.clone(), NOW);

    let files = destination_files(&config);
    assert_eq!(files.len(), 1);
    let (name, entries) = &files[0];
    assert_eq!(parse_destination_name(name), Some(Span::new(1, 5)));
    assert_eq!(ms_of(entries), vec![1, 5, 3]);
    assert!(file_names(&config.intermediate_dir()).is_empty());

    let stats = storer.stats(true);
    assert_eq!(stats.total_replayed, 3);
    assert_eq!(stats.total_consumed, 0);
    assert_eq!(stats.total_rotations, 1);
}

/// A crash mid-write leaves a partial last line. Complete entries survive,
/// the partial one is skipped.
#[test]
fn test_replay_skips_partial_line() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let content = format!("{}\n{}\n{{\"ms\":30,\"v\"", line(10, "a"), line(20, "b"));
    leave_intermediate(&config, "tmp:fghij.log", &content);

    let (storer, _clock) = open_storer(config.clone(), NOW);

    let files = destination_files(&config);
    assert_eq!(files.len(), 1);
    assert_eq!(parse_destination_name(&files[0].0), Some(Span::new(10, 20)));
    assert_eq!(ms_of(&files[0].1), vec![10, 20]);
    assert_eq!(storer.stats(true).total_replayed, 2);
}

/// Lines that are not objects with a numeric ms are dropped during replay.
#[test]
fn test_replay_skips_malformed_lines() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let content = [
        line(7, "a"),
        "not json".to_string(),
        r#"{"v":"no ms"}"#.to_string(),
        "[1,2,3]".to_string(),
        line(9, "b"),
    ]
    .join("\n");
    leave_intermediate(&config, "tmp:klmno.log", &content);

    let (_storer, _clock) = open_storer(config.clone(), NOW);

    let files = destination_files(&config);
    assert_eq!(files.len(), 1);
    assert_eq!(ms_of(&files[0].1), vec![7, 9]);
}

/// Leftovers with no valid entries are removed without producing a
/// destination file.
#[test]
fn test_replay_of_empty_leftover() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    leave_intermediate(&config, "tmp:pqrst.log", "");
    leave_intermediate(&config, "tmp:uvwxy.log", "garbage\n");

    let (_storer, _clock) = open_storer(config.clone(), NOW);

    assert!(destination_files(&config).is_empty());
    assert!(file_names(&config.intermediate_dir()).is_empty());
}

/// Only names following the intermediate schema are replayed.
#[test]
fn test_replay_ignores_foreign_files() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    leave_intermediate(&config, "notes.txt", &line(1, "a"));
    leave_intermediate(&config, "tmp:toolong.log", &line(2, "b"));

    let (_storer, _clock) = open_storer(config.clone(), NOW);

    assert!(destination_files(&config).is_empty());
    assert_eq!(
        file_names(&config.intermediate_dir()),
        vec!["notes.txt".to_string(), "tmp:toolong.log".to_string()]
    );
}

/// Each leftover becomes its own destination file.
#[test]
fn test_replay_multiple_leftovers() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    leave_intermediate(&config, "tmp:aaaaa.log", &format!("{}\n", line(100, "a")));
    leave_intermediate(&config, "tmp:bbbbb.log", &format!("{}\n", line(200, "b")));

    let (storer, _clock) = open_storer(config.clone(), NOW);

    let mut spans: Vec<Span> = destination_files(&config)
        .iter()
        .map(|(name, _)| parse_destination_name(name).unwrap())
        .collect();
    spans.sort_by_key(|s| s.first_ms);
    assert_eq!(spans, vec![Span::new(100, 100), Span::new(200, 200)]);
    assert_eq!(storer.stats(false).recent_files.unwrap().len(), 2);
}

/// Entries written by a storer that was dropped without shutdown are
/// recovered by the next one.
#[test]
fn test_recover_after_abandoned_storer() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());

    {
        let (mut storer, _clock) = open_storer(config.clone(), NOW);
        storer.push_line(&line(NOW - 10, "a")).unwrap();
        storer.push_line(&line(NOW - 5, "b")).unwrap();
        // no shutdown
    }
    assert_eq!(file_names(&config.intermediate_dir()).len(), 1);
    assert!(destination_files(&config).is_empty());

    // Append a torn line as if the process died mid-write
    let leftover = config
        .intermediate_dir()
        .join(&file_names(&config.intermediate_dir())[0]);
    let mut file = fs::OpenOptions::new().append(true).open(&leftover).unwrap();
    write!(file, r#"{{"ms":{},"v":"#, NOW).unwrap();
    drop(file);

    let (_storer, _clock) = open_storer(config.clone(), NOW);
    let files = destination_files(&config);
    assert_eq!(files.len(), 1);
    assert_eq!(ms_of(&files[0].1), vec![NOW - 10, NOW - 5]);
    assert!(file_names(&config.intermediate_dir()).is_empty());
}
