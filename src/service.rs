//! Shared, timer-driven wrapper around a [`Storer`].
//!
//! The storer itself is synchronous. This layer owns it behind a mutex,
//! runs the once-a-second bucket check, schedules age-based rotations and
//! exposes the follow side of the channel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::entry::Entry;
use crate::error::{FollowError, FollowResult, StorerError, StorerResult};
use crate::follow::{Broadcaster, FollowSource, Published, Snapshot};
use crate::rotation::Rotated;
use crate::stats::Stats;
use crate::storer::{AgeTimer, Input, PushOutcome, Storer};

/// Period of the bucket-boundary check.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct Inner {
    storer: Mutex<Option<Storer>>,
    broadcaster: Arc<Broadcaster>,
    stop: watch::Sender<bool>,
}

/// Cloneable handle to a running storer.
///
/// Must be started inside a Tokio runtime. After [`shutdown`](Self::shutdown)
/// every storer operation fails with [`StorerError::Stopped`].
#[derive(Clone)]
pub struct StorerService {
    inner: Arc<Inner>,
}

impl StorerService {
    /// Attach `broadcaster` as the storer's publisher and start the ticker.
    pub fn start(mut storer: Storer, broadcaster: Arc<Broadcaster>) -> Self {
        storer.set_publisher(broadcaster.clone());
        let (stop, _) = watch::channel(false);
        let service = StorerService {
            inner: Arc::new(Inner {
                storer: Mutex::new(Some(storer)),
                broadcaster,
                stop,
            }),
        };
        service.spawn_ticker();
        service
    }

    fn spawn_ticker(&self) {
        let service = self.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
                match service.on_blocking_pool(Storer::tick).await {
                    Ok(_) => {}
                    Err(StorerError::Stopped) => break,
                    Err(e) => error!("Periodic rotation check failed: {e}"),
                }
            }
            debug!("Ticker stopped");
        });
    }

    fn with_storer<T>(
        &self,
        f: impl FnOnce(&mut Storer) -> StorerResult<T>,
    ) -> StorerResult<T> {
        let mut guard = self.inner.storer.lock();
        let storer = guard.as_mut().ok_or(StorerError::Stopped)?;
        f(storer)
    }

    /// Run `f` on the blocking pool; rotations fsync and rename.
    async fn on_blocking_pool<T, F>(&self, f: F) -> StorerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Storer) -> StorerResult<T> + Send + 'static,
    {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.with_storer(f))
            .await
            .map_err(|e| StorerError::TaskFailed(e.to_string()))?
    }

    /// [`push_line`](Self::push_line) for async callers.
    pub async fn submit(&self, line: String) -> StorerResult<PushOutcome> {
        let outcome = self.on_blocking_pool(move |s| s.push_line(&line)).await?;
        self.arm(&outcome);
        Ok(outcome)
    }

    /// Ingest one raw line. See [`Storer::push_line`].
    pub fn push_line(&self, line: &str) -> StorerResult<PushOutcome> {
        let outcome = self.with_storer(|s| s.push_line(line))?;
        self.arm(&outcome);
        Ok(outcome)
    }

    pub fn push(&self, input: Input) -> StorerResult<PushOutcome> {
        let outcome = self.with_storer(|s| s.push(input))?;
        self.arm(&outcome);
        Ok(outcome)
    }

    fn arm(&self, outcome: &PushOutcome) {
        if let PushOutcome::Accepted {
            age_timer: Some(timer),
        } = outcome
        {
            self.spawn_age_timer(*timer);
        }
    }

    fn spawn_age_timer(&self, timer: AgeTimer) {
        let service = self.clone();
        let mut stop = self.inner.stop.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timer.after) => {}
                _ = stop.wait_for(|stopped| *stopped) => return,
            }
            match service.on_blocking_pool(move |s| s.expire(timer.generation)).await {
                Ok(_) | Err(StorerError::Stopped) => {}
                Err(e) => error!("Age rotation of generation {} failed: {e}", timer.generation),
            }
        });
    }

    pub fn flush(&self) -> StorerResult<Option<Rotated>> {
        self.with_storer(Storer::flush)
    }

    pub fn stats(&self, unit_test: bool) -> StorerResult<Stats> {
        self.with_storer(|s| Ok(s.stats(unit_test)))
    }

    pub fn pending(&self) -> StorerResult<Vec<Entry>> {
        self.with_storer(|s| Ok(s.pending()))
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.inner.broadcaster
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop.borrow()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has run.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static + use<> {
        let mut stop = self.inner.stop.subscribe();
        async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        }
    }

    /// Force-rotate the open file, release the writer lock, stop timers
    /// and end every live follower. Later calls return `Ok(None)`.
    pub fn shutdown(&self) -> StorerResult<Option<Rotated>> {
        let Some(storer) = self.inner.storer.lock().take() else {
            return Ok(None);
        };
        self.inner.stop.send_replace(true);
        let rotated = storer.shutdown();
        info!("Storer service stopped");
        rotated
    }

    fn take_snapshot(&self) -> FollowResult<Snapshot> {
        let guard = self.inner.storer.lock();
        let storer = guard
            .as_ref()
            .ok_or_else(|| FollowError::Snapshot(StorerError::Stopped.to_string()))?;
        // Publishing happens under this lock, so the watermark matches the
        // pending set exactly.
        Ok(Snapshot {
            entries: storer.pending(),
            watermark: self.inner.broadcaster.current_sequence(),
        })
    }
}

impl FollowSource for StorerService {
    fn subscribe(&self) -> broadcast::Receiver<Arc<Published>> {
        self.inner.broadcaster.subscribe()
    }

    fn snapshot(&self) -> impl Future<Output = FollowResult<Snapshot>> + Send {
        std::future::ready(self.take_snapshot())
    }
}
