//! Storer statistics, as surfaced by `STATS` and `/statusz`.

use serde::Serialize;

use crate::entry::Entry;
use crate::ring::RingBuffer;

/// Entries dropped before reaching a file, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rejections {
    pub missing_ms: u64,
    pub non_positive_ms: u64,
    pub time_discrepancy: u64,
    pub invalid_json: u64,
}

/// The open intermediate file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentFileStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub entries: usize,
    pub first_ms: Option<i64>,
    pub last_ms: Option<i64>,
    pub span_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_ms: Option<i64>,
}

/// Point-in-time statistics of a storer.
///
/// In unit-test mode every volatile field (uptime, ages, file names, QPS)
/// is `None` and omitted from JSON, so the output is reproducible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_consumed: u64,
    pub total_replayed: u64,
    pub total_rotations: u64,
    pub rejected: Rejections,
    pub current_file: Option<CurrentFileStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<i64>,
    pub recent_entries: Vec<Entry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_qps: Option<f64>,
}

/// Entries per second over the whole uptime.
pub fn overall_qps(consumed: u64, uptime_ms: i64) -> Option<f64> {
    (uptime_ms > 0).then(|| consumed as f64 * 1000.0 / uptime_ms as f64)
}

/// Entries per second across the window of recent acceptance timestamps.
///
/// `None` with fewer than two samples or when they all share one
/// millisecond.
pub fn window_qps(timestamps: &RingBuffer<i64>) -> Option<f64> {
    let (Ok(oldest), Ok(newest)) = (timestamps.peek_least_recent(), timestamps.peek_most_recent())
    else {
        return None;
    };
    let span_ms = newest - oldest;
    if timestamps.size() < 2 || span_ms <= 0 {
        return None;
    }
    Some((timestamps.size() - 1) as f64 * 1000.0 / span_ms as f64)
}
