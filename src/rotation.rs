//! Intermediate file lifecycle: open, append, rotate into a destination file,
//! and replay files left behind by a previous process.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::clock::SharedClock;
use crate::entry::Entry;
use crate::error::{StorerError, StorerResult};
use crate::naming::{self, DateFormat, Span};

/// Why a file is being rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotateReason {
    EntryLimit,
    MaxAge,
    BucketBoundary,
    Flush,
    Replay,
    Shutdown,
}

impl fmt::Display for RotateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotateReason::EntryLimit => "entry limit",
            RotateReason::MaxAge => "max age",
            RotateReason::BucketBoundary => "time bucket boundary",
            RotateReason::Flush => "flush",
            RotateReason::Replay => "replay",
            RotateReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// A destination file produced by a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rotated {
    pub name: String,
    pub path: PathBuf,
    pub span: Span,
    pub entries: usize,
}

/// Snapshot of the currently open intermediate file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub name: String,
    pub generation: u64,
    pub entries: usize,
    pub span: Option<Span>,
    pub opened_at_ms: i64,
    pub bucket: String,
}

/// Result of writing one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    /// Identity of the file the entry landed in.
    pub generation: u64,
    /// Entries in that file, including this one.
    pub entries: usize,
}

/// Totals from replaying leftover intermediate files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub files: usize,
    pub entries: u64,
    pub skipped_lines: u64,
}

/// Directories and naming for a [`WriteRotation`].
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub intermediate_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub date_format: DateFormat,
}

struct OpenFile {
    file: File,
    path: PathBuf,
    name: String,
    generation: u64,
    // Written but not yet rotated; this is the follow channel's "pending" set.
    uncommitted: Vec<Entry>,
    span: Option<Span>,
    opened_at_ms: i64,
    bucket: String,
}

impl OpenFile {
    fn status(&self) -> FileStatus {
        FileStatus {
            name: self.name.clone(),
            generation: self.generation,
            entries: self.uncommitted.len(),
            span: self.span,
            opened_at_ms: self.opened_at_ms,
            bucket: self.bucket.clone(),
        }
    }
}

/// Owns the single open intermediate file of a writer.
///
/// State is `Closed` (no file) or `Open`. Files open lazily on the first
/// write. Every opened file gets a fresh generation number; deferred
/// actions carry the generation they were armed for and are ignored once
/// the file has rotated.
pub struct WriteRotation {
    settings: RotationSettings,
    clock: SharedClock,
    current: Option<OpenFile>,
    last_generation: u64,
    rotations: u64,
}

impl WriteRotation {
    /// Both directories must already exist.
    pub fn new(settings: RotationSettings, clock: SharedClock) -> StorerResult<Self> {
        for dir in [&settings.intermediate_dir, &settings.destination_dir] {
            if !dir.is_dir() {
                return Err(StorerError::MissingDirectory(dir.clone()));
            }
        }
        Ok(WriteRotation {
            settings,
            clock,
            current: None,
            last_generation: 0,
            rotations: 0,
        })
    }

    pub fn settings(&self) -> &RotationSettings {
        &self.settings
    }

    /// Number of destination files produced so far.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Generation of the open file, if any.
    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(|f| f.generation)
    }

    pub fn status(&self) -> Option<FileStatus> {
        self.current.as_ref().map(OpenFile::status)
    }

    /// Entries in the open file, oldest first.
    pub fn pending(&self) -> &[Entry] {
        self.current
            .as_ref()
            .map(|f| f.uncommitted.as_slice())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> usize {
        self.pending().len()
    }

    /// Date bucket of `now_ms`.
    pub fn bucket_of(&self, now_ms: i64) -> String {
        self.settings.date_format.bucket(now_ms)
    }

    /// True if a file is open and was opened in a different bucket.
    pub fn bucket_changed(&self, now_ms: i64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|f| f.bucket != self.bucket_of(now_ms))
    }

    /// Move the open file into the bucket of `now_ms` without rotating.
    /// Only meaningful for empty files.
    pub fn rebucket(&mut self, now_ms: i64) {
        let bucket = self.bucket_of(now_ms);
        if let Some(open) = self.current.as_mut() {
            open.bucket = bucket;
        }
    }

    /// Open a fresh intermediate file unless one is already open. Returns
    /// its generation.
    pub fn ensure_open(&mut self) -> StorerResult<u64> {
        Ok(self.open_file()?.generation)
    }

    fn open_file(&mut self) -> StorerResult<&mut OpenFile> {
        let open = match self.current.take() {
            Some(open) => open,
            None => self.create_file()?,
        };
        Ok(self.current.insert(open))
    }

    fn create_file(&mut self) -> StorerResult<OpenFile> {
        let now = self.clock.now_ms();
        let (name, path) = loop {
            let name = naming::intermediate_name(&naming::random_hash());
            let path = self.settings.intermediate_dir.join(&name);
            if !path.exists() {
                break (name, path);
            }
        };
        debug!("Intermediate {}: opening", path.display());
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Intermediate {}: opened", path.display());

        self.last_generation += 1;
        Ok(OpenFile {
            file,
            path,
            name,
            generation: self.last_generation,
            uncommitted: Vec::new(),
            span: None,
            opened_at_ms: now,
            bucket: self.bucket_of(now),
        })
    }

    /// Append `entry`, whose timestamp is `ms`, as one line, opening a file
    /// if none is open.
    pub fn write(&mut self, ms: i64, entry: &Entry) -> StorerResult<Written> {
        let line = entry.to_line()?;
        let open = self.open_file()?;

        writeln!(open.file, "{line}")?;
        match open.span.as_mut() {
            Some(span) => span.include(ms),
            None => open.span = Some(Span::point(ms)),
        }
        open.uncommitted.push(entry.clone());
        Ok(Written {
            generation: open.generation,
            entries: open.uncommitted.len(),
        })
    }

    /// Close the open file: sync it, then rename it into the destination
    /// directory if it holds entries, or delete it if empty.
    ///
    /// Returns the new destination file, if one was produced. A no-op when
    /// no file is open.
    pub fn rotate(&mut self, reason: RotateReason) -> StorerResult<Option<Rotated>> {
        // The file stays current until it has been renamed, so a failed
        // rotation keeps its entries pending and is retried next time.
        let Some(open) = self.current.as_ref() else {
            return Ok(None);
        };

        debug!("Intermediate {}: closing ({reason})", open.path.display());
        if let Err(e) = open.file.sync_all() {
            error!("Intermediate {}: sync failed, keeping it open: {e}", open.path.display());
            return Err(e.into());
        }

        let Some(span) = open.span else {
            let path = open.path.clone();
            self.current = None;
            debug!("Intermediate {}: unlinking empty", path.display());
            fs::remove_file(&path)?;
            return Ok(None);
        };

        let date = self.settings.date_format.bucket(span.first_ms);
        let (name, destination) = loop {
            let name = naming::destination_name(&date, &naming::random_hash(), span);
            let destination = self.settings.destination_dir.join(&name);
            if !destination.exists() {
                break (name, destination);
            }
        };
        debug!("Destination {}: atomically renaming", destination.display());
        if let Err(e) = fs::rename(&open.path, &destination) {
            error!(
                "Intermediate {}: rename to {} failed, keeping it open: {e}",
                open.path.display(),
                destination.display()
            );
            return Err(e.into());
        }

        let entries = self.current.take().map_or(0, |open| open.uncommitted.len());
        self.rotations += 1;
        info!("Destination {}: {entries} entries ({reason})", destination.display());

        Ok(Some(Rotated {
            name,
            path: destination,
            span,
            entries,
        }))
    }

    /// Rotate only if the open file is still generation `generation`.
    pub fn rotate_if_current(
        &mut self,
        generation: u64,
        reason: RotateReason,
    ) -> StorerResult<Option<Rotated>> {
        if self.generation() != Some(generation) {
            debug!("Ignoring stale {reason} rotation for generation {generation}");
            return Ok(None);
        }
        self.rotate(reason)
    }

    /// Recover intermediate files left by a previous process.
    ///
    /// Each leftover `tmp:*.log` is parsed line by line; entries with a
    /// numeric `ms` are copied into a fresh intermediate file, which is
    /// force-rotated into a destination file, and the leftover is deleted.
    /// Truncated or malformed lines are skipped. Must run before any other
    /// write.
    pub fn replay(&mut self) -> StorerResult<(ReplaySummary, Vec<Rotated>)> {
        let mut summary = ReplaySummary::default();
        let mut produced = Vec::new();
        let leftovers = self.leftover_files()?;
        if !leftovers.is_empty() {
            info!("Replaying {} intermediate files", leftovers.len());
        }
        for path in leftovers {
            let (good, total) = self.replay_file(&path)?;
            if let Some(rotated) = self.rotate(RotateReason::Replay)? {
                produced.push(rotated);
            }
            fs::remove_file(&path)?;
            info!(
                "Replayed {}: {good} entries parsed{}",
                path.display(),
                if good == total {
                    String::new()
                } else {
                    format!(" (out of {total} lines)")
                }
            );
            summary.files += 1;
            summary.entries += good;
            summary.skipped_lines += total - good;
        }
        Ok((summary, produced))
    }

    fn leftover_files(&self) -> StorerResult<Vec<PathBuf>> {
        let mut leftovers = Vec::new();
        for dir_entry in fs::read_dir(&self.settings.intermediate_dir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let name = file_name.to_string_lossy();
            if naming::parse_intermediate_name(&name).is_some()
                && dir_entry.file_type()?.is_file()
            {
                leftovers.push(dir_entry.path());
            } else {
                warn!(
                    "Not replaying {}: not an intermediate file",
                    dir_entry.path().display()
                );
            }
        }
        leftovers.sort();
        Ok(leftovers)
    }

    fn replay_file(&mut self, path: &Path) -> StorerResult<(u64, u64)> {
        debug!("Replaying {}: begin", path.display());
        let bytes = fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let (mut good, mut total) = (0u64, 0u64);
        for line in content.split('\n').filter(|l| !l.trim().is_empty()) {
            total += 1;
            let parsed = Entry::parse(line)
                .and_then(|e| e.ms().map(|ms| (ms, e)))
                .filter(|(ms, _)| *ms > 0);
            if let Some((ms, entry)) = parsed {
                self.write(ms, &entry)?;
                good += 1;
            }
        }
        Ok((good, total))
    }
}
