//! Catalog of destination files, ordered by descending last timestamp.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};
use crate::naming::{self, Span};

/// Half-open time range `[begin_ms, end_ms)`; no `end_ms` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub begin_ms: i64,
    #[serde(default)]
    pub end_ms: Option<i64>,
}

impl Query {
    pub fn all() -> Self {
        Query::default()
    }

    pub fn since(begin_ms: i64) -> Self {
        Query {
            begin_ms,
            end_ms: None,
        }
    }

    pub fn between(begin_ms: i64, end_ms: i64) -> Self {
        Query {
            begin_ms,
            end_ms: Some(end_ms),
        }
    }

    pub fn contains(&self, ms: i64) -> bool {
        ms >= self.begin_ms && self.end_ms.is_none_or(|end| ms < end)
    }

    /// Whether a file spanning `span` (inclusive) may hold matching entries.
    pub fn overlaps(&self, span: &Span) -> bool {
        let starts_after_end = self.end_ms.is_some_and(|end| span.first_ms >= end);
        let ends_before_begin = span.last_ms < self.begin_ms;
        !starts_after_end && !ends_before_begin
    }
}

/// One catalogued destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    pub name: String,
    pub path: PathBuf,
    pub span: Span,
}

/// Destination files known to the fetcher.
///
/// Invariant: `files()[i].span.last_ms >= files()[j].span.last_ms` for
/// `i < j`, which lets a query stop scanning at the first file ending
/// before its begin.
#[derive(Debug, Clone)]
pub struct TimeIndex {
    dir: PathBuf,
    seen: HashSet<String>,
    sorted: Vec<IndexedFile>,
}

impl TimeIndex {
    /// An empty catalog for `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        TimeIndex {
            dir: dir.as_ref().to_path_buf(),
            seen: HashSet::new(),
            sorted: Vec::new(),
        }
    }

    /// Catalog every file currently in `dir`. Malformed names are logged
    /// and skipped.
    pub fn discover(dir: impl AsRef<Path>) -> FetchResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(FetchError::NotADirectory(dir.to_path_buf()));
        }
        info!("Fetching from {}", dir.display());
        let mut index = TimeIndex::new(dir);
        for name in list_names(dir)? {
            index.use_file(&name);
        }
        Ok(index)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `name` has been offered before, valid or not.
    pub fn has_seen(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    /// Offer one filename from the directory. Returns true if it was added.
    ///
    /// A name offered twice is ignored with a warning. Names that do not
    /// exist, are not regular files, or do not follow the destination
    /// schema are logged and remembered, but never catalogued.
    pub fn use_file(&mut self, name: &str) -> bool {
        if !self.seen.insert(name.to_string()) {
            warn!("File {name} has already been considered, ignoring");
            return false;
        }
        let path = self.dir.join(name);
        match fs::metadata(&path) {
            Err(_) => {
                warn!("File {} does not exist", path.display());
                return false;
            }
            Ok(meta) if !meta.is_file() => {
                warn!("File {} is not a file", path.display());
                return false;
            }
            Ok(_) => {}
        }
        let Some(span) = naming::parse_destination_name(name) else {
            warn!(
                "Filename of {} is malformed, it will not be considered",
                path.display()
            );
            return false;
        };

        info!("Adding {}", path.display());
        let at = self
            .sorted
            .partition_point(|f| f.span.last_ms >= span.last_ms);
        self.sorted.insert(
            at,
            IndexedFile {
                name: name.to_string(),
                path,
                span,
            },
        );
        true
    }

    /// Files that may hold entries in `query`, newest first.
    pub fn select(&self, query: &Query) -> Vec<IndexedFile> {
        let mut selected = Vec::new();
        for file in &self.sorted {
            if file.span.last_ms < query.begin_ms {
                // Every remaining file ends even earlier.
                break;
            }
            if query.overlaps(&file.span) {
                selected.push(file.clone());
            }
        }
        selected
    }

    pub fn files(&self) -> &[IndexedFile] {
        &self.sorted
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

/// Names of the entries in `dir`, sorted.
pub(crate) fn list_names(dir: &Path) -> FetchResult<Vec<String>> {
    let io_err = |source| FetchError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
