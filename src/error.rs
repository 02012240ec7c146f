use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the writer side (lock, rotation, ingest).
///
/// Malformed input and policy rejections are not errors; they are counted
/// and reported through [`PushOutcome`](crate::PushOutcome).
#[derive(Debug, Error)]
pub enum StorerError {
    /// Another process owns the destination directory. Retryable by the
    /// operator once the other writer exits.
    #[error("another writer holds the lock: {}", path.display())]
    LockBusy { path: PathBuf },

    #[error("directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("invalid date format {format:?}: {reason}")]
    InvalidDateFormat { format: String, reason: String },

    /// The storer has already been shut down.
    #[error("storer is stopped")]
    Stopped,

    /// A storer operation panicked on the blocking pool.
    #[error("storer task failed: {0}")]
    TaskFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorerResult<T> = Result<T, StorerError>;

/// Errors raised by the read side.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("directory watch failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("reader task failed: {0}")]
    TaskFailed(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Terminal errors for a single follower. They never reach the writer.
#[derive(Debug, Error)]
pub enum FollowError {
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("snapshot timed out after {0:?}")]
    Timeout(Duration),

    /// The follower fell behind the bounded channel and missed entries.
    #[error("follower lagged behind and missed {0} entries")]
    Lagged(u64),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub type FollowResult<T> = Result<T, FollowError>;

/// Returned by [`RingBuffer`](crate::RingBuffer) peeks on an empty buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("called {0} on an empty ring buffer")]
pub struct EmptyBuffer(pub &'static str);
