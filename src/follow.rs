//! Real-time distribution of accepted entries.
//!
//! A follower subscribes to the live channel, then asks the writer for a
//! snapshot of its pending entries (written but not yet rotated) together
//! with the sequence number of the last entry published before the
//! snapshot. Live messages inside the snapshot's sequence range are
//! skipped. Older ones were accepted after subscribing but rotated before
//! the snapshot, so they are delivered ahead of the pending entries.
//! Subscribing before snapshotting means nothing accepted during the
//! handoff can fall through the seam.
//!
//! With `since_ms`, entries already rotated into destination files are
//! fetched first. That history/pending seam is at-least-once: an entry
//! rotated between the snapshot and the fetch can be delivered twice.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::entry::Entry;
use crate::error::{FollowError, FollowResult};
use crate::fetcher::Fetcher;
use crate::index::Query;
use crate::storer::Publish;

/// One message on the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub seq: u64,
    pub entry: Entry,
}

/// Wire shape of a channel message: `{"entry": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub entry: Entry,
}

/// Pending entries plus the last sequence number they account for.
///
/// Pending entries are always the most recently published ones, so the
/// snapshot covers the sequence range `watermark - entries.len() + 1 ..=
/// watermark`. Anything published earlier was rotated away before the
/// snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub entries: Vec<Entry>,
    pub watermark: u64,
}

impl Snapshot {
    /// Sequence number of the oldest pending entry.
    pub fn first_seq(&self) -> u64 {
        (self.watermark + 1).saturating_sub(self.entries.len() as u64)
    }

    /// Whether the live message `seq` is already one of the pending entries.
    pub fn covers(&self, seq: u64) -> bool {
        seq >= self.first_seq() && seq <= self.watermark
    }
}

/// Fan-out of accepted entries to every subscriber.
///
/// Publishing never blocks; a subscriber that falls more than the channel
/// capacity behind loses messages and is told so on its next receive.
#[derive(Debug)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<Published>>,
    sequence: AtomicU64,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence: AtomicU64::new(0),
        }
    }

    /// Sequence number of the most recently published entry (0 if none).
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Published>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Publish for Broadcaster {
    fn publish(&self, entry: &Entry) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers is fine.
        let _ = self.tx.send(Arc::new(Published {
            seq,
            entry: entry.clone(),
        }));
    }
}

/// The writer side as seen by a follower.
pub trait FollowSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<Arc<Published>>;

    /// Pending entries and the watermark, read atomically with respect to
    /// publishing.
    fn snapshot(&self) -> impl Future<Output = FollowResult<Snapshot>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowRequest {
    /// Also deliver rotated entries with `ms >= since_ms`.
    pub since_ms: Option<i64>,
    pub snapshot_timeout: Duration,
}

impl Default for FollowRequest {
    fn default() -> Self {
        Self {
            since_ms: None,
            snapshot_timeout: Duration::from_secs(5),
        }
    }
}

/// Stream of entries: history (if requested), then the pending snapshot,
/// then live entries in publish order.
///
/// Ends when the channel closes; yields one error and ends if the
/// snapshot fails or times out, a history fetch fails, or the follower
/// lags behind the channel.
pub fn follow_stream<S>(
    source: Arc<S>,
    history: Option<Arc<Fetcher>>,
    request: FollowRequest,
) -> impl Stream<Item = FollowResult<Entry>> + Send
where
    S: FollowSource + 'static,
{
    async_stream::stream! {
        let mut live = source.subscribe();
        let snapshot = match tokio::time::timeout(request.snapshot_timeout, source.snapshot()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                yield Err(e);
                return;
            }
            Err(_) => {
                yield Err(FollowError::Timeout(request.snapshot_timeout));
                return;
            }
        };

        // Entries published after subscribing but rotated before the
        // snapshot are already queued; they precede the pending ones.
        let mut rotated_meanwhile = Vec::new();
        let mut next_live = None;
        let mut closed = false;
        loop {
            match live.try_recv() {
                Ok(message) if message.seq < snapshot.first_seq() => {
                    rotated_meanwhile.push(message.entry.clone());
                }
                Ok(message) if snapshot.covers(message.seq) => continue,
                Ok(message) => {
                    next_live = Some(message);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    closed = true;
                    break;
                }
                Err(TryRecvError::Lagged(missed)) => {
                    yield Err(FollowError::Lagged(missed));
                    return;
                }
            }
        }

        let since_ms = request.since_ms.unwrap_or(i64::MIN);
        if let (Some(since_ms), Some(fetcher)) = (request.since_ms, history.as_ref()) {
            match fetcher.fetch(Query::since(since_ms)).await {
                Ok(history) => {
                    for entry in history {
                        yield Ok(entry);
                    }
                }
                Err(e) => {
                    yield Err(FollowError::from(e));
                    return;
                }
            }
        }

        for entry in rotated_meanwhile {
            yield Ok(entry);
        }
        for entry in snapshot.entries.iter() {
            if entry.ms().is_some_and(|ms| ms >= since_ms) {
                yield Ok(entry.clone());
            }
        }
        if let Some(message) = next_live {
            yield Ok(message.entry.clone());
        }
        if closed {
            return;
        }

        loop {
            match live.recv().await {
                Ok(message) if message.seq <= snapshot.watermark => continue,
                Ok(message) => yield Ok(message.entry.clone()),
                Err(RecvError::Lagged(missed)) => {
                    yield Err(FollowError::Lagged(missed));
                    break;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Drive [`follow_stream`] into a callback until it breaks, the channel
/// closes, or an error ends the stream.
pub async fn follow<S, F>(
    source: Arc<S>,
    history: Option<Arc<Fetcher>>,
    request: FollowRequest,
    mut on_entry: F,
) -> FollowResult<()>
where
    S: FollowSource + 'static,
    F: FnMut(Entry) -> ControlFlow<()>,
{
    let stream = follow_stream(source, history, request);
    futures::pin_mut!(stream);
    while let Some(entry) = stream.next().await {
        if on_entry(entry?).is_break() {
            break;
        }
    }
    Ok(())
}
