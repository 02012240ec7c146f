//! Entry acceptance: validation, time filtering, rotation triggers, stats
//! and the publish hook.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::clock::{ReplayClock, SharedClock, SystemClock};
use crate::config::StorerConfig;
use crate::entry::Entry;
use crate::error::StorerResult;
use crate::lock::WriterLock;
use crate::naming::DateFormat;
use crate::ring::RingBuffer;
use crate::rotation::{RotateReason, Rotated, RotationSettings, WriteRotation};
use crate::stats::{self, CurrentFileStats, Rejections, Stats};

/// Administrative commands, only honored when the storer runs with
/// `debug` enabled since they bypass normal validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminCommand {
    /// Tear down and exit.
    Stop,
    /// Dump the effective configuration.
    Config,
    /// Open an intermediate file now.
    Create,
    /// Rotate the open file now.
    Flush,
    /// Dump the full internal state.
    Status,
    Stats,
    /// Stats with volatile fields removed.
    UnitTestStats,
}

impl AdminCommand {
    pub const ALL: [AdminCommand; 7] = [
        AdminCommand::Stop,
        AdminCommand::Config,
        AdminCommand::Create,
        AdminCommand::Flush,
        AdminCommand::Status,
        AdminCommand::Stats,
        AdminCommand::UnitTestStats,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            AdminCommand::Stop => "STOP",
            AdminCommand::Config => "CONFIG",
            AdminCommand::Create => "CREATE",
            AdminCommand::Flush => "FLUSH",
            AdminCommand::Status => "STATUS",
            AdminCommand::Stats => "STATS",
            AdminCommand::UnitTestStats => "UNITTEST_STATS",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        AdminCommand::ALL.into_iter().find(|c| c.keyword() == word)
    }
}

/// What arrives on the ingest path.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Entry(Entry),
    Admin(AdminCommand),
}

impl Input {
    /// Classify a raw line. Keywords are only recognized when
    /// `admin_enabled`; otherwise the line must be a JSON object.
    ///
    /// Returns `None` for invalid JSON.
    pub fn parse(line: &str, admin_enabled: bool) -> Option<Input> {
        if admin_enabled && let Some(command) = AdminCommand::from_keyword(line.trim()) {
            return Some(Input::Admin(command));
        }
        Entry::parse(line).map(Input::Entry)
    }
}

/// Why an input was dropped. Dropped inputs are counted, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingMs,
    /// `ms` at or before the epoch; destination names need positive bounds.
    NonPositiveMs { ms: i64 },
    TimeDiscrepancy { ms: i64, now_ms: i64 },
    InvalidJson,
    AdminDisabled(AdminCommand),
}

/// Request to rotate the file of `generation` after `after` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeTimer {
    pub generation: u64,
    pub after: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminReply {
    Stop,
    Config(StorerConfig),
    Created { generation: u64 },
    Flushed(Option<Rotated>),
    Status(Value),
    Stats(Stats),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Durably appended. `age_timer` is set when this entry was the first
    /// in its file and a maximum file age is configured; the caller is
    /// expected to call [`Storer::expire`] once it fires.
    Accepted { age_timer: Option<AgeTimer> },
    Rejected(Rejection),
    Admin(AdminReply),
}

/// Receives every accepted entry, after it is written.
pub trait Publish: Send + Sync {
    fn publish(&self, entry: &Entry);
}

#[derive(Debug, Default)]
struct Counters {
    consumed: u64,
    replayed: u64,
    rejected: Rejections,
    // Next time-discrepancy count that gets logged: 1, 10, 100, ...
    discrepancy_report_at: u64,
}

/// The writer: accepts entries and drives a [`WriteRotation`].
///
/// Holds the writer lock for its whole lifetime. All mutation goes through
/// `&mut self`, so acceptance, rotation triggers and the periodic bucket
/// check are serialized by construction.
pub struct Storer {
    config: StorerConfig,
    clock: SharedClock,
    rotation: WriteRotation,
    lock: Option<WriterLock>,
    publisher: Option<Arc<dyn Publish>>,
    recent_entries: RingBuffer<Entry>,
    recent_timestamps: RingBuffer<i64>,
    recent_files: RingBuffer<String>,
    counters: Counters,
    started_ms: i64,
}

impl Storer {
    /// Open with the clock implied by `config.mock_time`.
    pub fn open(config: StorerConfig) -> StorerResult<Self> {
        let clock: SharedClock = if config.mock_time {
            Arc::new(ReplayClock::new())
        } else {
            Arc::new(SystemClock)
        };
        Storer::open_with_clock(config, clock)
    }

    /// Acquire the writer lock, create the directories, and replay any
    /// intermediate files left by a previous process.
    pub fn open_with_clock(config: StorerConfig, clock: SharedClock) -> StorerResult<Self> {
        let date_format = DateFormat::new(&config.date_format)?;
        let lock = WriterLock::acquire(&config.lockfile)?;

        let intermediate_dir = config.intermediate_dir();
        let destination_dir = config.destination_dir();
        fs::create_dir_all(&intermediate_dir)?;
        fs::create_dir_all(&destination_dir)?;
        info!("Intermediate dir {}", intermediate_dir.display());
        info!("Destination dir {}", destination_dir.display());

        let mut rotation = WriteRotation::new(
            RotationSettings {
                intermediate_dir,
                destination_dir,
                date_format,
            },
            Arc::clone(&clock),
        )?;
        let (replayed, produced) = rotation.replay()?;

        let capacity = config.recent_capacity.max(1);
        let mut storer = Storer {
            started_ms: clock.now_ms(),
            config,
            clock,
            rotation,
            lock: Some(lock),
            publisher: None,
            recent_entries: RingBuffer::new(capacity),
            recent_timestamps: RingBuffer::new(capacity),
            recent_files: RingBuffer::new(capacity),
            counters: Counters {
                replayed: replayed.entries,
                discrepancy_report_at: 1,
                ..Counters::default()
            },
        };
        for rotated in produced {
            storer.recent_files.push(rotated.name);
        }
        Ok(storer)
    }

    pub fn set_publisher(&mut self, publisher: Arc<dyn Publish>) {
        self.publisher = Some(publisher);
    }

    pub fn config(&self) -> &StorerConfig {
        &self.config
    }

    pub fn rotation(&self) -> &WriteRotation {
        &self.rotation
    }

    /// Ingest one raw line: an admin keyword (debug mode) or a JSON object.
    pub fn push_line(&mut self, line: &str) -> StorerResult<PushOutcome> {
        match Input::parse(line, self.config.debug) {
            Some(input) => self.push(input),
            None => {
                self.counters.rejected.invalid_json += 1;
                warn!("Dropping invalid JSON input");
                Ok(PushOutcome::Rejected(Rejection::InvalidJson))
            }
        }
    }

    pub fn push(&mut self, input: Input) -> StorerResult<PushOutcome> {
        match input {
            Input::Entry(entry) => self.append(entry),
            Input::Admin(command) if !self.config.debug => {
                warn!("Ignoring {} command: debug mode is off", command.keyword());
                Ok(PushOutcome::Rejected(Rejection::AdminDisabled(command)))
            }
            Input::Admin(command) => Ok(PushOutcome::Admin(self.execute(command)?)),
        }
    }

    /// Validate, time-filter and write one entry.
    ///
    /// Rejections are counted and returned, not raised. I/O failures on the
    /// open file are raised.
    pub fn append(&mut self, entry: Entry) -> StorerResult<PushOutcome> {
        let Some(ms) = entry.ms() else {
            self.counters.rejected.missing_ms += 1;
            debug!("Dropping entry without a numeric ms field");
            return Ok(PushOutcome::Rejected(Rejection::MissingMs));
        };
        if ms <= 0 {
            self.counters.rejected.non_positive_ms += 1;
            debug!("Dropping entry with non-positive ms {ms}");
            return Ok(PushOutcome::Rejected(Rejection::NonPositiveMs { ms }));
        }

        self.clock.observe(ms);
        let now_ms = self.clock.now_ms();
        let max_discrepancy = self.config.max_time_discrepancy_ms.max(0) as u64;
        if ms.abs_diff(now_ms) > max_discrepancy {
            self.reject_discrepancy(ms, now_ms);
            return Ok(PushOutcome::Rejected(Rejection::TimeDiscrepancy { ms, now_ms }));
        }

        // Keep every destination file inside one date bucket.
        if self.rotation.bucket_changed(now_ms) {
            let rotated = self.rotation.rotate(RotateReason::BucketBoundary)?;
            self.record(rotated);
        }

        let written = self.rotation.write(ms, &entry)?;
        self.counters.consumed += 1;
        self.recent_timestamps.push(now_ms);

        if let Some(every) = self.config.log_frequency.filter(|n| *n > 0)
            && written.entries as u64 % every == 0
        {
            info!(
                "Intermediate generation {}: {} entries",
                written.generation, written.entries
            );
        }

        let age_timer = match self.config.max_file_age_ms {
            Some(age_ms) if written.entries == 1 => Some(AgeTimer {
                generation: written.generation,
                after: Duration::from_millis(age_ms),
            }),
            _ => None,
        };

        if let Some(publisher) = &self.publisher {
            publisher.publish(&entry);
        }
        self.recent_entries.push(entry);

        if let Some(max) = self.config.max_entries_per_file
            && written.entries as u64 > max
        {
            let rotated = self.rotation.rotate(RotateReason::EntryLimit)?;
            self.record(rotated);
        }

        Ok(PushOutcome::Accepted { age_timer })
    }

    fn reject_discrepancy(&mut self, ms: i64, now_ms: i64) {
        self.counters.rejected.time_discrepancy += 1;
        let total = self.counters.rejected.time_discrepancy;
        debug!("Dropping entry with ms={ms}, now={now_ms}: time discrepancy");
        if total >= self.counters.discrepancy_report_at {
            self.counters.discrepancy_report_at = self.counters.discrepancy_report_at.saturating_mul(10);
            warn!("{total} total entries skipped because of time discrepancy");
        }
    }

    pub fn execute(&mut self, command: AdminCommand) -> StorerResult<AdminReply> {
        debug!("Executing {}", command.keyword());
        Ok(match command {
            AdminCommand::Stop => AdminReply::Stop,
            AdminCommand::Config => AdminReply::Config(self.config.clone()),
            AdminCommand::Create => AdminReply::Created {
                generation: self.rotation.ensure_open()?,
            },
            AdminCommand::Flush => AdminReply::Flushed(self.flush()?),
            AdminCommand::Status => AdminReply::Status(self.status()),
            AdminCommand::Stats => AdminReply::Stats(self.stats(false)),
            AdminCommand::UnitTestStats => AdminReply::Stats(self.stats(true)),
        })
    }

    /// Rotate the open file regardless of triggers.
    pub fn flush(&mut self) -> StorerResult<Option<Rotated>> {
        let rotated = self.rotation.rotate(RotateReason::Flush)?;
        Ok(self.record(rotated))
    }

    /// Periodic bucket-boundary check; meant to run every second.
    ///
    /// Rotates a non-empty file whose bucket has passed. An empty file is
    /// simply moved into the new bucket.
    pub fn tick(&mut self) -> StorerResult<Option<Rotated>> {
        let now_ms = self.clock.now_ms();
        if !self.rotation.bucket_changed(now_ms) {
            return Ok(None);
        }
        if self.rotation.entries() == 0 {
            debug!("Time boundary {}: nothing to flush", self.rotation.bucket_of(now_ms));
            self.rotation.rebucket(now_ms);
            return Ok(None);
        }
        info!("Time boundary {}: flushing", self.rotation.bucket_of(now_ms));
        let rotated = self.rotation.rotate(RotateReason::BucketBoundary)?;
        Ok(self.record(rotated))
    }

    /// Fire an age timer armed for `generation`. Stale timers, whose file
    /// has already rotated for another reason, do nothing.
    pub fn expire(&mut self, generation: u64) -> StorerResult<Option<Rotated>> {
        let rotated = self
            .rotation
            .rotate_if_current(generation, RotateReason::MaxAge)?;
        Ok(self.record(rotated))
    }

    fn record(&mut self, rotated: Option<Rotated>) -> Option<Rotated> {
        if let Some(r) = &rotated {
            self.recent_files.push(r.name.clone());
        }
        rotated
    }

    /// Entries written to the open file but not yet rotated.
    pub fn pending(&self) -> Vec<Entry> {
        self.rotation.pending().to_vec()
    }

    pub fn stats(&self, unit_test: bool) -> Stats {
        let now_ms = self.clock.now_ms();
        let volatile = !unit_test;
        let uptime_ms = now_ms - self.started_ms;
        let current_file = self.rotation.status().map(|f| CurrentFileStats {
            name: volatile.then(|| f.name.clone()),
            entries: f.entries,
            first_ms: f.span.map(|s| s.first_ms),
            last_ms: f.span.map(|s| s.last_ms),
            span_ms: f.span.map(|s| s.len_ms()),
            age_ms: volatile.then(|| now_ms - f.opened_at_ms),
        });
        Stats {
            total_consumed: self.counters.consumed,
            total_replayed: self.counters.replayed,
            total_rotations: self.rotation.rotations(),
            rejected: self.counters.rejected,
            current_file,
            uptime_ms: volatile.then_some(uptime_ms),
            recent_entries: self.recent_entries.dump(),
            recent_files: volatile.then(|| self.recent_files.dump()),
            qps: if volatile {
                stats::overall_qps(self.counters.consumed, uptime_ms)
            } else {
                None
            },
            recent_qps: if volatile {
                stats::window_qps(&self.recent_timestamps)
            } else {
                None
            },
        }
    }

    /// Full internal state, for debugging.
    pub fn status(&self) -> Value {
        json!({
            "config": self.config,
            "lockfile": self.lock.as_ref().map(|l| l.path().display().to_string()),
            "current_file": self.rotation.status(),
            "pending": self.rotation.pending(),
            "rotations": self.rotation.rotations(),
            "total_consumed": self.counters.consumed,
            "total_replayed": self.counters.replayed,
            "rejected": self.counters.rejected,
            "recent_files": self.recent_files.dump(),
            "recent_timestamps": self.recent_timestamps.dump(),
            "started_ms": self.started_ms,
            "now_ms": self.clock.now_ms(),
        })
    }

    /// Force-rotate the open file, then release the writer lock.
    pub fn shutdown(mut self) -> StorerResult<Option<Rotated>> {
        info!("Tearing down storer");
        let rotated = self.rotation.rotate(RotateReason::Shutdown)?;
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(rotated)
    }
}
