#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use logship::{Entry, ManualClock, Storer, StorerConfig};
use serde_json::json;

/// Default "now" for storer tests.
pub const NOW: i64 = 1_000_000;

pub fn entry(ms: i64, v: &str) -> Entry {
    Entry::from_value(json!({"ms": ms, "v": v})).unwrap()
}

pub fn line(ms: i64, v: &str) -> String {
    entry(ms, v).to_line().unwrap()
}

/// Config rooted in `dir` with admin commands enabled.
pub fn config_in(dir: &Path) -> StorerConfig {
    StorerConfig {
        debug: true,
        ..StorerConfig::in_dir(dir)
    }
}

pub fn open_storer(config: StorerConfig, now: i64) -> (Storer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let storer = Storer::open_with_clock(config, clock.clone()).unwrap();
    (storer, clock)
}

/// Sorted names of the regular files in `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn read_entries(path: &Path) -> Vec<Entry> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter_map(Entry::parse)
        .collect()
}

/// Every destination file with its entries, sorted by name.
pub fn destination_files(config: &StorerConfig) -> Vec<(String, Vec<Entry>)> {
    let dir = config.destination_dir();
    file_names(&dir)
        .into_iter()
        .map(|name| {
            let entries = read_entries(&dir.join(&name));
            (name, entries)
        })
        .collect()
}

/// Write a destination file by hand, named for `[first, last]`.
pub fn write_destination(dir: &Path, hash: &str, first: i64, last: i64, lines: &[String]) -> PathBuf {
    let path = dir.join(format!("2024-01-01-00-00:{hash}:{first}:{last}.log"));
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).unwrap();
    path
}

pub fn ms_of(entries: &[Entry]) -> Vec<i64> {
    entries.iter().map(|e| e.ms().unwrap()).collect()
}
