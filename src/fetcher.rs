//! Range queries over destination files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::config::{Discovery, FetcherConfig};
use crate::entry::Entry;
use crate::error::{FetchError, FetchResult};
use crate::index::{self, IndexedFile, Query, TimeIndex};

enum DiscoveryHandle {
    Watch(RecommendedWatcher),
    Poll(JoinHandle<()>),
}

/// Answers `[begin, end)` queries by reading only the destination files
/// whose encoded range overlaps the query.
///
/// Files are read concurrently; a semaphore caps how many are open at once
/// across all in-flight fetches. Destination files are immutable, so
/// concurrent fetches never conflict.
pub struct Fetcher {
    config: FetcherConfig,
    index: Arc<RwLock<TimeIndex>>,
    permits: Arc<Semaphore>,
    discovery: Mutex<Option<DiscoveryHandle>>,
}

impl Fetcher {
    /// Catalog the files already in `config.dir`. Call
    /// [`start_discovery`](Self::start_discovery) to pick up later ones.
    pub fn open(config: FetcherConfig) -> FetchResult<Self> {
        let index = TimeIndex::discover(&config.dir)?;
        info!(
            "Fetcher catalogued {} files in {}",
            index.len(),
            config.dir.display()
        );
        Ok(Fetcher {
            permits: Arc::new(Semaphore::new(config.max_open_files.max(1))),
            index: Arc::new(RwLock::new(index)),
            discovery: Mutex::new(None),
            config,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Number of catalogued files.
    pub fn file_count(&self) -> usize {
        self.index.read().len()
    }

    /// Register a file that appeared after startup.
    pub fn use_file(&self, name: &str) -> bool {
        self.index.write().use_file(name)
    }

    /// Begin watching or polling for new files, per the configured mode.
    /// Polling needs a Tokio runtime.
    pub fn start_discovery(&self) -> FetchResult<()> {
        let handle = match self.config.discovery {
            Discovery::Manual => return Ok(()),
            Discovery::Watch => DiscoveryHandle::Watch(self.watch()?),
            Discovery::Poll { interval_ms } => {
                DiscoveryHandle::Poll(self.poll(Duration::from_millis(interval_ms.max(1))))
            }
        };
        *self.discovery.lock() = Some(handle);
        Ok(())
    }

    fn watch(&self) -> FetchResult<RecommendedWatcher> {
        let catalog = Arc::clone(&self.index);
        let dir = self.config.dir.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let created = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                    );
                    if created {
                        for path in &event.paths {
                            offer(&catalog, &dir, path);
                        }
                    }
                }
                Err(e) => error!("Watch error: {e}"),
            })?;
        watcher.watch(&self.config.dir, RecursiveMode::NonRecursive)?;
        info!("Watching {} for new files", self.config.dir.display());
        Ok(watcher)
    }

    fn poll(&self, every: Duration) -> JoinHandle<()> {
        let catalog = Arc::clone(&self.index);
        let dir = self.config.dir.clone();
        info!(
            "Polling {} for new files every {every:?}",
            self.config.dir.display()
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let scan_dir = dir.clone();
                let names = tokio::task::spawn_blocking(move || index::list_names(&scan_dir)).await;
                match names {
                    Ok(Ok(names)) => {
                        for name in names {
                            offer(&catalog, &dir, &dir.join(name));
                        }
                    }
                    Ok(Err(e)) => error!("Rescan failed: {e}"),
                    Err(e) => error!("Rescan task failed: {e}"),
                }
            }
        })
    }

    /// Stop discovering new files. Fetches keep working on the catalog.
    pub fn stop_discovery(&self) {
        match self.discovery.lock().take() {
            Some(DiscoveryHandle::Poll(task)) => task.abort(),
            Some(DiscoveryHandle::Watch(watcher)) => drop(watcher),
            None => {}
        }
    }

    /// Every entry with `ms` in the query range, sorted ascending by `ms`.
    ///
    /// Selected files are read in parallel, each holding one open-file
    /// permit; callers wait while the cap is saturated. Lines that are not
    /// JSON objects with a numeric `ms` are skipped. A file that cannot be
    /// read fails the whole fetch.
    pub async fn fetch(&self, query: Query) -> FetchResult<Vec<Entry>> {
        let selected = self.index.read().select(&query);
        debug!("Query {query:?}: {} files selected", selected.len());
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let mut reads = JoinSet::new();
        for file in selected {
            let permits = Arc::clone(&self.permits);
            reads.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| FetchError::TaskFailed(e.to_string()))?;
                read_matching(&file, &query).await
            });
        }

        let mut matched = Vec::new();
        while let Some(joined) = reads.join_next().await {
            let entries = joined.map_err(|e| FetchError::TaskFailed(e.to_string()))??;
            matched.extend(entries);
        }
        matched.sort_by_key(|(ms, _)| *ms);
        Ok(matched.into_iter().map(|(_, entry)| entry).collect())
    }

    pub fn shutdown(&self) {
        self.stop_discovery();
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.stop_discovery();
    }
}

/// Register `path` if it sits directly in `dir` and is new to the index.
fn offer(catalog: &RwLock<TimeIndex>, dir: &Path, path: &Path) {
    if path.parent() != Some(dir) {
        return;
    }
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return;
    };
    let mut catalog = catalog.write();
    if !catalog.has_seen(&name) && path.is_file() {
        catalog.use_file(&name);
    }
}

async fn read_matching(file: &IndexedFile, query: &Query) -> FetchResult<Vec<(i64, Entry)>> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .map_err(|source| FetchError::Io {
            path: file.path.clone(),
            source,
        })?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(content
        .lines()
        .filter_map(Entry::parse)
        .filter_map(|entry| entry.ms().map(|ms| (ms, entry)))
        .filter(|(ms, _)| query.contains(*ms))
        .collect())
}
