//! Configuration for the storer, the fetcher and the pub/sub surface.
//!
//! All structs serialize to JSON so the storer can dump its effective
//! configuration on request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::naming::DEFAULT_DATE_FORMAT;
use crate::ring::DEFAULT_CAPACITY;

/// Writer-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorerConfig {
    /// Exclusive lock file; also the anchor for the default directories.
    pub lockfile: PathBuf,
    /// Defaults to `<lockfile dir>/intermediate`.
    pub intermediate_dir: Option<PathBuf>,
    /// Defaults to `<lockfile dir>/destination`.
    pub destination_dir: Option<PathBuf>,
    /// Log a progress line every this many entries written to one file.
    pub log_frequency: Option<u64>,
    /// Entries further than this from "now" are dropped.
    pub max_time_discrepancy_ms: i64,
    /// Rotate once a file holds more than this many entries.
    pub max_entries_per_file: Option<u64>,
    /// Rotate a file this long after its first entry was written.
    pub max_file_age_ms: Option<u64>,
    /// strftime pattern for the date prefix of destination names.
    pub date_format: String,
    /// Take "now" from entry timestamps instead of the wall clock.
    pub mock_time: bool,
    /// Accept administrative keywords on the ingest path.
    pub debug: bool,
    /// Capacity of each recent-activity ring buffer.
    pub recent_capacity: usize,
}

impl Default for StorerConfig {
    fn default() -> Self {
        Self {
            lockfile: PathBuf::from("/tmp/logship/lock"),
            intermediate_dir: None,
            destination_dir: None,
            log_frequency: Some(1000),
            max_time_discrepancy_ms: 5000,
            max_entries_per_file: None,
            max_file_age_ms: None,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            mock_time: false,
            debug: false,
            recent_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl StorerConfig {
    /// Config rooted at `dir`: lock file `dir/lock`, default subdirectories.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            lockfile: dir.as_ref().join("lock"),
            ..Default::default()
        }
    }

    fn lock_dir(&self) -> PathBuf {
        self.lockfile
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        self.intermediate_dir
            .clone()
            .unwrap_or_else(|| self.lock_dir().join("intermediate"))
    }

    pub fn destination_dir(&self) -> PathBuf {
        self.destination_dir
            .clone()
            .unwrap_or_else(|| self.lock_dir().join("destination"))
    }
}

/// How the fetcher learns about destination files written after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discovery {
    /// Filesystem notifications.
    Watch,
    /// Rescan the directory every `interval_ms`.
    Poll { interval_ms: u64 },
    /// Only the files present at startup, plus explicit `use_file` calls.
    Manual,
}

/// Reader-side settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub dir: PathBuf,
    /// Cap on simultaneously open files across all in-flight fetches.
    pub max_open_files: usize,
    pub discovery: Discovery,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/tmp/logship/destination"),
            max_open_files: 250,
            discovery: Discovery::Watch,
        }
    }
}

impl FetcherConfig {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

/// Settings for the HTTP pub/sub surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    pub port: u16,
    /// Path prefix for the channel route.
    pub mount: String,
    pub channel: String,
    /// Period of SSE keepalive comments.
    pub keepalive_ms: u64,
    pub keepalive_text: String,
    /// How long teardown waits for open subscriptions before forcing.
    pub shutdown_grace_ms: u64,
    pub snapshot_timeout_ms: u64,
    /// Bound of the broadcast channel; slower followers lag out.
    pub channel_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            mount: "/pubsub".to_string(),
            channel: "entries".to_string(),
            keepalive_ms: 15_000,
            keepalive_text: "keepalive".to_string(),
            shutdown_grace_ms: 2000,
            snapshot_timeout_ms: 5000,
            channel_capacity: 4096,
        }
    }
}

impl PubSubConfig {
    /// Route of the live channel, e.g. `/pubsub/entries`.
    pub fn channel_path(&self) -> String {
        format!(
            "/{}/{}",
            self.mount.trim_matches('/'),
            self.channel.trim_matches('/')
        )
        .replace("//", "/")
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}
