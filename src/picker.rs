//! The coordinator: owns the index, the frecency store, the git tracker,
//! the watcher and the worker pool, and exposes the whole query/mutation
//! API as methods on one explicitly owned value.
//!
//! Lifecycle calls (`new`, `restart_index_in_path`, `cleanup`) are
//! serialized on the calling thread; `fuzzy_search_files` may run
//! concurrently with background mutation. A newer search cancels any
//! in-flight one through a shared epoch observed at record-batch
//! boundaries.

use crate::config::PickerConfig;
use crate::error::{Error, Result};
use crate::frecency::{FrecencyStore, StoreHealth};
use crate::git::{self, GitTracker};
use crate::index::{FileIndex, IgnorePredicate};
use crate::path_utils;
use crate::score;
use crate::types::{FsEvent, ScanProgress, ScoringContext, SearchOutcome};
use crate::watcher::{EventQueue, IndexWatcher, WatchMessage};
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the drain thread sleeps waiting for events before re-checking
/// for shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(200);

/// Aggregate health surface for hosts.
#[derive(Debug, Clone)]
pub struct PickerHealth {
    pub base_path: PathBuf,
    pub indexed_files: usize,
    pub generation: u64,
    pub is_scanning: bool,
    pub git_root: Option<PathBuf>,
    pub frecency: StoreHealth,
}

struct ScanGate {
    done: Mutex<bool>,
    cond: Condvar,
}

impl ScanGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn open(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.cond.wait_for(&mut done, timeout);
        }
        *done
    }
}

pub struct FilePicker {
    config: PickerConfig,
    ignore: IgnorePredicate,
    index: Arc<FileIndex>,
    frecency: Arc<FrecencyStore>,
    git: Arc<RwLock<GitTracker>>,
    watcher: Option<IndexWatcher>,
    queue: Arc<EventQueue>,
    drain_handle: Option<JoinHandle<()>>,
    pool: rayon::ThreadPool,
    search_epoch: Arc<AtomicU64>,
    scan_gate: Arc<ScanGate>,
    closed: AtomicBool,
}

impl std::fmt::Debug for FilePicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePicker")
            .field("base_path", &self.index.base_path())
            .field("index", &self.index)
            .field("frecency", &self.frecency)
            .finish_non_exhaustive()
    }
}

impl FilePicker {
    /// Build a picker over `config.base_path` with the default hidden-file
    /// rule. Returns immediately; the initial scan proceeds in the
    /// background and queries meanwhile see the partial set.
    pub fn new(config: PickerConfig) -> Result<Self> {
        Self::with_ignore_predicate(config, Arc::new(path_utils::is_hidden_path))
    }

    /// Like [`new`](Self::new), with a host-supplied exclusion predicate.
    /// The predicate receives paths relative to the base and returns true
    /// for entries that must stay out of the index.
    pub fn with_ignore_predicate(config: PickerConfig, ignore: IgnorePredicate) -> Result<Self> {
        let base = config.resolved_base()?;
        info!(base = %base.display(), "Initializing file picker");

        let index = Arc::new(FileIndex::new(&base, Arc::clone(&ignore), config.max_threads)?);
        let base = index.base_path();

        let frecency = Arc::new(match &config.frecency.db_path {
            Some(db_path) if config.frecency.enabled => {
                match FrecencyStore::open(db_path, true) {
                    Ok(store) => store,
                    Err(e) => {
                        warn!(?e, "Frecency database unavailable, falling back to memory");
                        FrecencyStore::in_memory()
                    }
                }
            }
            _ => FrecencyStore::in_memory(),
        });

        let git = Arc::new(RwLock::new(GitTracker::discover(&base)));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_threads.max(1))
            .thread_name(|i| format!("fastpick-worker-{i}"))
            .build()?;

        let queue = EventQueue::new();
        let watcher = match IndexWatcher::spawn(
            base.clone(),
            git.read().workdir().map(Path::to_path_buf),
            Arc::clone(&ignore),
            Arc::clone(&queue),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                error!(?e, "Failed to start file watcher");
                None
            }
        };

        let drain_handle = Some(spawn_drain_thread(
            Arc::clone(&index),
            Arc::clone(&frecency),
            Arc::clone(&git),
            Arc::clone(&queue),
            config.frecency.enabled,
        ));

        let scan_gate = ScanGate::new();
        spawn_initial_scan(
            Arc::clone(&index),
            config.frecency.enabled.then(|| Arc::clone(&frecency)),
            Arc::clone(&git),
            Arc::clone(&scan_gate),
        );

        Ok(Self {
            config,
            ignore,
            index,
            frecency,
            git,
            watcher,
            queue,
            drain_handle,
            pool,
            search_epoch: Arc::new(AtomicU64::new(0)),
            scan_gate,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            Err(Error::NotInitialized)
        } else {
            Ok(())
        }
    }

    pub fn base_path(&self) -> PathBuf {
        self.index.base_path()
    }

    pub fn git_root(&self) -> Option<PathBuf> {
        self.git.read().workdir().map(Path::to_path_buf)
    }

    pub fn scan_progress(&self) -> ScanProgress {
        self.index.progress()
    }

    pub fn is_scan_active(&self) -> bool {
        self.index.is_scan_active()
    }

    /// Block until the initial scan has completed, up to `timeout`.
    /// Returns false when the scan is still running.
    pub fn wait_for_initial_scan(&self, timeout: Duration) -> bool {
        self.scan_gate.wait(timeout)
    }

    /// Open (or replace) the frecency database and rescore every record
    /// from the merged history.
    pub fn init_db(&self, db_path: &Path, create_if_missing: bool) -> Result<()> {
        self.ensure_open()?;
        self.frecency.attach_db(db_path, create_if_missing)?;

        let snapshot = self.index.snapshot();
        for record in &snapshot.records {
            record.set_frecency_score(self.frecency.score_for(&record.path));
        }
        Ok(())
    }

    /// Trigger a blocking rescan of the current base.
    pub fn scan_files(&self) -> Result<()> {
        self.ensure_open()?;
        let store = self
            .config
            .frecency
            .enabled
            .then(|| Arc::clone(&self.frecency));
        self.index.rescan(store)?;
        git::refresh_quietly(&self.git.read().clone(), &self.index.snapshot().records);
        Ok(())
    }

    /// Re-root the index. Validation is synchronous; the scan of the new
    /// base proceeds in the background.
    pub fn restart_index_in_path(&mut self, new_base: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        let canonical = path_utils::canonicalize(new_base.as_ref())
            .map_err(|_| Error::InvalidBase(new_base.as_ref().to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(Error::InvalidBase(canonical));
        }

        info!(new_base = %canonical.display(), "Restarting index in new base");

        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        *self.git.write() = GitTracker::discover(&canonical);

        self.watcher = match IndexWatcher::spawn(
            canonical.clone(),
            self.git.read().workdir().map(Path::to_path_buf),
            Arc::clone(&self.ignore),
            Arc::clone(&self.queue),
        ) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                error!(?e, "Failed to restart file watcher");
                None
            }
        };

        let index = Arc::clone(&self.index);
        let store = self
            .config
            .frecency
            .enabled
            .then(|| Arc::clone(&self.frecency));
        let git = Arc::clone(&self.git);
        std::thread::spawn(move || {
            match index.restart(&canonical, store) {
                Ok(()) => {
                    git::refresh_quietly(&git.read().clone(), &index.snapshot().records);
                    info!("Index restart completed");
                }
                Err(e) => error!(?e, "Index restart failed"),
            }
        });

        Ok(())
    }

    /// Rank the index against `query` and return the top `max_results`
    /// (0 falls back to the configured default).
    ///
    /// Returns [`Error::Cancelled`] when a newer search supersedes this one
    /// mid-flight.
    pub fn fuzzy_search_files(
        &self,
        query: &str,
        max_results: usize,
        current_file: Option<&str>,
        cwd: Option<&Path>,
    ) -> Result<SearchOutcome> {
        self.ensure_open()?;
        let started = Instant::now();
        let snapshot = self.index.snapshot();
        let query_id = self.search_epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let max_results = if max_results == 0 {
            self.config.max_results
        } else {
            max_results
        };

        let context = ScoringContext {
            query,
            current_file,
            cwd,
            max_results,
            min_score: crate::fuzzy::DEFAULT_MIN_SCORE,
            now: path_utils::unix_now_secs(),
            in_worktree: self.git.read().is_active(),
            epoch: &self.search_epoch,
            query_id,
        };

        let (hits, total_matched) = self
            .pool
            .install(|| score::rank(&snapshot.records, &context))?;

        let (items, scores) = hits.into_iter().unzip();
        let outcome = SearchOutcome {
            items,
            scores,
            total_matched,
            total_files: snapshot.len(),
            generation: snapshot.generation,
            query_duration_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            query,
            total_matched = outcome.total_matched,
            returned = outcome.items.len(),
            duration_ms = outcome.query_duration_ms,
            "Fuzzy search completed"
        );
        Ok(outcome)
    }

    /// Record that the host opened `path`. The in-memory score is visible
    /// to the next query; persistence happens off this thread.
    pub fn track_access(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        if !self.config.frecency.enabled {
            return Ok(());
        }

        let canonical = path_utils::canonicalize(path.as_ref())
            .map_err(|_| Error::InvalidPath(path.as_ref().to_path_buf()))?;

        let score = self.frecency.track_access(&canonical);
        if let Some(record) = self.index.record_for_path(&canonical) {
            record.set_frecency_score(score);
        }

        // LMDB writes are milliseconds; keep them off the caller's thread
        let store = Arc::clone(&self.frecency);
        std::thread::spawn(move || store.persist_entry(&canonical));

        Ok(())
    }

    /// Re-read the worktree status and apply it to all records. Returns the
    /// number of records whose status changed.
    pub fn refresh_git_status(&self) -> Result<usize> {
        self.ensure_open()?;
        let tracker = self.git.read().clone();
        let snapshot = self.index.snapshot();
        tracker.refresh(&snapshot.records)
    }

    pub fn health(&self) -> PickerHealth {
        let progress = self.index.progress();
        PickerHealth {
            base_path: self.index.base_path(),
            indexed_files: self.index.snapshot().len(),
            generation: self.index.generation(),
            is_scanning: progress.is_scanning,
            git_root: self.git_root(),
            frecency: self.frecency.health(),
        }
    }

    /// Stop the watcher, drain and join background threads and flush the
    /// frecency store. Idempotent; also runs on drop.
    pub fn cleanup(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down file picker");

        // cancel any in-flight search
        self.search_epoch.fetch_add(1, Ordering::AcqRel);

        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.queue.push(WatchMessage::Shutdown);
        if let Some(handle) = self.drain_handle.take()
            && handle.join().is_err()
        {
            error!("Drain thread panicked during shutdown");
        }

        self.frecency.flush();
        info!("File picker cleanup completed");
    }
}

impl Drop for FilePicker {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn spawn_initial_scan(
    index: Arc<FileIndex>,
    frecency: Option<Arc<FrecencyStore>>,
    git: Arc<RwLock<GitTracker>>,
    gate: Arc<ScanGate>,
) {
    std::thread::spawn(move || {
        match index.scan(frecency, true) {
            Ok(()) => {
                git::refresh_quietly(&git.read().clone(), &index.snapshot().records);
            }
            Err(e) => error!(?e, "Initial scan failed"),
        }
        gate.open();
    });
}

fn spawn_drain_thread(
    index: Arc<FileIndex>,
    frecency: Arc<FrecencyStore>,
    git: Arc<RwLock<GitTracker>>,
    queue: Arc<EventQueue>,
    frecency_enabled: bool,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let Some(message) = queue.pop(DRAIN_POLL) else {
                continue;
            };

            match message {
                WatchMessage::Shutdown => break,
                WatchMessage::Event(event) => {
                    let touched = match &event {
                        FsEvent::Created(path) | FsEvent::Modified(path) => Some(path.clone()),
                        FsEvent::Renamed { to, .. } => Some(to.clone()),
                        FsEvent::Deleted(_) => None,
                    };

                    let store = frecency_enabled.then_some(frecency.as_ref());
                    index.apply_event(event, store);

                    // one file changed: query its status directly rather
                    // than walking the whole tree
                    let workdir = git.read().workdir().map(Path::to_path_buf);
                    if let Some(path) = touched
                        && let Some(workdir) = workdir
                        && let Some(status) = git::status_for_file(&workdir, &path)
                        && let Some(record) = index.record_for_path(&path)
                    {
                        record.set_git_status(status);
                    }
                }
                WatchMessage::FullRescan => {
                    info!("Processing full rescan request");
                    let store = frecency_enabled.then(|| Arc::clone(&frecency));
                    if let Err(e) = index.rescan(store) {
                        error!(?e, "Background rescan failed");
                    }
                    git::refresh_quietly(&git.read().clone(), &index.snapshot().records);
                }
                WatchMessage::GitRefresh => {
                    git::refresh_quietly(&git.read().clone(), &index.snapshot().records);
                }
            }
        }
        debug!("Event drain thread exited");
    })
}
