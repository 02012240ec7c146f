//! File naming schemas.
//!
//! Intermediate: `tmp:<hash>.log`.
//! Destination:  `<date>:<hash>:<first_ms>:<last_ms>.log`, where the two
//! numbers are the inclusive bounds of the `ms` values inside the file.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::{StorerError, StorerResult};

pub const LOG_SUFFIX: &str = ".log";
pub const INTERMEDIATE_PREFIX: &str = "tmp:";
pub const HASH_LEN: usize = 5;
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d-%H-%M";

static HASH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Inclusive `[first_ms, last_ms]` range of the entries in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub first_ms: i64,
    pub last_ms: i64,
}

impl Span {
    pub fn new(first_ms: i64, last_ms: i64) -> Self {
        Span { first_ms, last_ms }
    }

    pub fn point(ms: i64) -> Self {
        Span::new(ms, ms)
    }

    /// Widen to cover `ms`.
    pub fn include(&mut self, ms: i64) {
        self.first_ms = self.first_ms.min(ms);
        self.last_ms = self.last_ms.max(ms);
    }

    pub fn contains(&self, ms: i64) -> bool {
        self.first_ms <= ms && ms <= self.last_ms
    }

    pub fn len_ms(&self) -> i64 {
        self.last_ms - self.first_ms
    }
}

/// Five random lowercase letters.
///
/// Mixes the pid, wall nanos and a process-wide counter through xxh64 so
/// names stay distinct across rapid rotations and concurrent processes.
pub fn random_hash() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seed = format!(
        "{}:{}:{}",
        std::process::id(),
        nanos,
        HASH_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let mut h = xxhash_rust::xxh64::xxh64(seed.as_bytes(), 0);
    (0..HASH_LEN)
        .map(|_| {
            let c = (b'a' + (h % 26) as u8) as char;
            h /= 26;
            c
        })
        .collect()
}

pub fn intermediate_name(hash: &str) -> String {
    format!("{INTERMEDIATE_PREFIX}{hash}{LOG_SUFFIX}")
}

/// Returns the hash if `name` follows the intermediate schema.
pub fn parse_intermediate_name(name: &str) -> Option<&str> {
    let hash = name
        .strip_prefix(INTERMEDIATE_PREFIX)?
        .strip_suffix(LOG_SUFFIX)?;
    let valid = hash.len() == HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    valid.then_some(hash)
}

pub fn destination_name(date: &str, hash: &str, span: Span) -> String {
    format!(
        "{date}:{hash}:{}:{}{LOG_SUFFIX}",
        span.first_ms, span.last_ms
    )
}

/// Parse the time range out of a destination filename.
///
/// Rejects anything that is not four `:`-separated fields with a `.log`
/// suffix, positive bounds and `first <= last`. The date and hash fields
/// are not inspected.
///
/// ```
/// use logship::naming::{parse_destination_name, Span};
///
/// assert_eq!(
///     parse_destination_name("2024-01-01-10-00:abcde:150:300.log"),
///     Some(Span::new(150, 300))
/// );
/// assert_eq!(parse_destination_name("2024-01-01-10-00:abcde:300:150.log"), None);
/// assert_eq!(parse_destination_name("tmp:abcde.log"), None);
/// ```
pub fn parse_destination_name(name: &str) -> Option<Span> {
    let stem = name.strip_suffix(LOG_SUFFIX)?;
    let fields: Vec<&str> = stem.split(':').collect();
    let [_, _, first, last] = fields.as_slice() else {
        return None;
    };
    let first: i64 = first.parse().ok()?;
    let last: i64 = last.parse().ok()?;
    if first <= 0 || last <= 0 || first > last {
        return None;
    }
    Some(Span::new(first, last))
}

/// A validated strftime pattern rendering milliseconds into date buckets
/// (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    pattern: String,
}

impl DateFormat {
    /// Validate `pattern`. The rendered bucket becomes the first field of
    /// destination names, so it may not contain `:` or a path separator.
    pub fn new(pattern: &str) -> StorerResult<Self> {
        let invalid = |reason: &str| StorerError::InvalidDateFormat {
            format: pattern.to_string(),
            reason: reason.to_string(),
        };
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(invalid("unrecognized specifier"));
        }
        let format = DateFormat {
            pattern: pattern.to_string(),
        };
        let sample = format.bucket(1_000_000_000_000);
        if sample.is_empty() {
            return Err(invalid("renders an empty string"));
        }
        if sample.contains(':') || sample.contains('/') || sample.contains('\\') {
            return Err(invalid("renders ':' or a path separator"));
        }
        Ok(format)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Render `ms` with this pattern.
    pub fn bucket(&self, ms: i64) -> String {
        let mut out = String::new();
        match DateTime::<Utc>::from_timestamp_millis(ms) {
            Some(t) => {
                let _ = write!(out, "{}", t.format(&self.pattern));
            }
            None => {
                let _ = write!(out, "{ms}");
            }
        }
        out
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        DateFormat {
            pattern: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}
