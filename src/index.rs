//! The live file index: a parallel scan fills it, the watcher mutates it,
//! and queries read immutable snapshots that writers swap atomically.

use crate::error::{Error, Result};
use crate::frecency::FrecencyStore;
use crate::path_utils;
use crate::types::{FileRecord, FsEvent, IndexSnapshot, ScanProgress};
use ahash::{AHashMap, AHashSet};
use ignore::{WalkBuilder, WalkState};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Returns true for paths (relative to the base) that must not be indexed.
pub type IgnorePredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Per-thread scan buffers are flushed into the shared state at this size,
/// keeping the critical section short.
const FLUSH_BATCH: usize = 512;

struct WriterState {
    records: Vec<Arc<FileRecord>>,
    path_to_pos: AHashMap<PathBuf, usize>,
    tombstones: AHashSet<u32>,
}

impl WriterState {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            path_to_pos: AHashMap::new(),
            tombstones: AHashSet::new(),
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        self.path_to_pos.clear();
        self.tombstones.clear();
    }

    fn insert(&mut self, record: Arc<FileRecord>) -> bool {
        if self.path_to_pos.contains_key(&record.path) {
            self.tombstones.insert(record.id);
            return false;
        }
        self.path_to_pos
            .insert(record.path.clone(), self.records.len());
        self.records.push(record);
        true
    }

    fn remove(&mut self, path: &Path) -> bool {
        let Some(pos) = self.path_to_pos.remove(path) else {
            return false;
        };
        let record = self.records.swap_remove(pos);
        self.tombstones.insert(record.id);
        if let Some(moved) = self.records.get(pos) {
            self.path_to_pos.insert(moved.path.clone(), pos);
        }
        true
    }

    /// Remove every record under a directory; returns how many went away.
    fn remove_subtree(&mut self, dir: &Path) -> usize {
        let before = self.records.len();
        let tombstones = &mut self.tombstones;
        self.records.retain(|record| {
            if record.path.starts_with(dir) {
                tombstones.insert(record.id);
                false
            } else {
                true
            }
        });
        let removed = before - self.records.len();
        if removed > 0 {
            self.path_to_pos.clear();
            for (pos, record) in self.records.iter().enumerate() {
                self.path_to_pos.insert(record.path.clone(), pos);
            }
        }
        removed
    }
}

pub struct FileIndex {
    base: RwLock<PathBuf>,
    ignore: IgnorePredicate,
    max_threads: usize,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<WriterState>,
    generation: AtomicU64,
    next_id: AtomicU32,
    scanned_count: AtomicUsize,
    is_scanning: AtomicBool,
}

impl std::fmt::Debug for FileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndex")
            .field("base", &*self.base.read())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("files", &self.snapshot.read().len())
            .field("is_scanning", &self.is_scanning.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the scanning flag on every exit path.
struct ScanFlag<'a>(&'a AtomicBool);

impl Drop for ScanFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl FileIndex {
    pub fn new(
        base_path: impl AsRef<Path>,
        ignore: IgnorePredicate,
        max_threads: usize,
    ) -> Result<Self> {
        let base = path_utils::canonicalize(base_path.as_ref())
            .map_err(|_| Error::InvalidBase(base_path.as_ref().to_path_buf()))?;
        if !base.is_dir() {
            return Err(Error::InvalidBase(base));
        }

        Ok(Self {
            base: RwLock::new(base),
            ignore,
            max_threads: max_threads.max(1),
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty())),
            writer: Mutex::new(WriterState::new()),
            generation: AtomicU64::new(0),
            next_id: AtomicU32::new(0),
            scanned_count: AtomicUsize::new(0),
            is_scanning: AtomicBool::new(false),
        })
    }

    pub fn base_path(&self) -> PathBuf {
        self.base.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Read-only view of the index, valid until dropped; never blocks
    /// writers for longer than the pointer swap.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn progress(&self) -> ScanProgress {
        ScanProgress {
            scanned_files_count: self.scanned_count.load(Ordering::Relaxed),
            is_scanning: self.is_scanning.load(Ordering::Relaxed),
        }
    }

    pub fn is_scan_active(&self) -> bool {
        self.is_scanning.load(Ordering::Relaxed)
    }

    pub fn record_for_path(&self, path: &Path) -> Option<Arc<FileRecord>> {
        let writer = self.writer.lock();
        let pos = *writer.path_to_pos.get(path)?;
        writer.records.get(pos).map(Arc::clone)
    }

    /// Is `path` (absolute) excluded from the index?
    fn is_ignored(&self, path: &Path) -> bool {
        let base = self.base.read();
        match path.strip_prefix(&*base) {
            Ok(rel) if rel.as_os_str().is_empty() => true,
            Ok(rel) => (self.ignore)(rel),
            Err(_) => true,
        }
    }

    fn publish_locked(&self, writer: &WriterState, generation: u64) {
        let snapshot = Arc::new(IndexSnapshot {
            generation,
            records: writer.records.clone(),
        });
        *self.snapshot.write() = snapshot;
    }

    /// Full parallel walk of the base directory.
    ///
    /// `incremental` publishes batches as they arrive so queries issued
    /// before the walk completes see the partial set; a rescan instead
    /// stages aside and swaps once at the end.
    pub fn scan(&self, frecency: Option<Arc<FrecencyStore>>, incremental: bool) -> Result<()> {
        if self.is_scanning.swap(true, Ordering::Relaxed) {
            debug!("Scan already in progress, skipping");
            return Ok(());
        }
        let _flag = ScanFlag(&self.is_scanning);
        self.scanned_count.store(0, Ordering::Relaxed);

        let base = self.base_path();
        // a root that cannot be enumerated is fatal; per-entry errors below
        // are not
        std::fs::read_dir(&base).map_err(Error::ScanFailed)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let scan_start = std::time::Instant::now();
        info!(base = %base.display(), generation, incremental, "Starting filesystem scan");

        let staging: Mutex<Vec<Arc<FileRecord>>> = Mutex::new(Vec::new());
        let staging_counter = AtomicU32::new(0);

        // An incremental scan shares the live id counter so watcher events
        // applied mid-scan cannot collide; a rescan numbers its staging set
        // from zero and installs the counter on swap.
        let id_counter: &AtomicU32 = if incremental {
            let mut writer = self.writer.lock();
            writer.clear();
            self.next_id.store(0, Ordering::Relaxed);
            self.publish_locked(&writer, generation);
            &self.next_id
        } else {
            &staging_counter
        };

        let walker = WalkBuilder::new(&base)
            .standard_filters(false)
            .hidden(true)
            .follow_links(false)
            .threads(self.max_threads)
            .build_parallel();

        walker.run(|| {
            let frecency = frecency.as_deref();
            let base = &base;
            let staging = &staging;

            let mut buffer = FlushBuffer {
                index: self,
                staging,
                generation,
                incremental,
                local: Vec::with_capacity(FLUSH_BATCH),
            };

            Box::new(move |result| {
                let entry = match result {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(?err, "Skipping unreadable entry");
                        return WalkState::Continue;
                    }
                };

                let Some(file_type) = entry.file_type() else {
                    return WalkState::Continue;
                };
                if file_type.is_dir() {
                    return WalkState::Continue;
                }

                let path = entry.path();
                if is_git_path(path) || buffer.index.is_ignored(path) {
                    return WalkState::Continue;
                }

                let is_symlink = file_type.is_symlink();
                if is_symlink {
                    // index symlinks to regular files, skip everything else
                    match std::fs::metadata(path) {
                        Ok(meta) if meta.is_file() => {}
                        _ => return WalkState::Continue,
                    }
                } else if !file_type.is_file() {
                    return WalkState::Continue;
                }

                let id = id_counter.fetch_add(1, Ordering::Relaxed);
                let record = Arc::new(FileRecord::from_fs(
                    id,
                    path.to_path_buf(),
                    &base,
                    is_symlink,
                ));
                if let Some(store) = &frecency {
                    record.set_frecency_score(store.score_for(&record.path));
                }

                buffer.push(record);
                WalkState::Continue
            })
        });

        if incremental {
            // per-batch publishes already ran; make sure the final state is
            // out even for an empty directory
            let writer = self.writer.lock();
            self.publish_locked(&writer, generation);
        } else {
            let staged = std::mem::take(&mut *staging.lock());
            let delta = {
                let mut writer = self.writer.lock();
                let old_count = writer.records.len();
                writer.clear();
                for record in staged {
                    writer.insert(record);
                }
                self.next_id
                    .store(id_counter.load(Ordering::Relaxed), Ordering::Relaxed);
                self.publish_locked(&writer, generation);
                writer.records.len() as i64 - old_count as i64
            };
            debug!(delta, "Rescan swapped in new generation");
        }

        info!(
            files = self.snapshot().len(),
            elapsed = ?scan_start.elapsed(),
            "Filesystem scan completed"
        );
        Ok(())
    }

    /// Apply one normalized filesystem event.
    pub fn apply_event(&self, event: FsEvent, frecency: Option<&FrecencyStore>) {
        match event {
            FsEvent::Created(path) | FsEvent::Modified(path) => {
                self.upsert_path(&path, frecency);
            }
            FsEvent::Deleted(path) => {
                self.remove_path(&path);
            }
            FsEvent::Renamed { from, to } => {
                self.remove_path(&from);
                self.upsert_path(&to, frecency);
            }
        }
    }

    fn upsert_path(&self, path: &Path, frecency: Option<&FrecencyStore>) {
        if self.is_ignored(path) || is_git_path(path) {
            return;
        }

        let existing = {
            let writer = self.writer.lock();
            writer
                .path_to_pos
                .get(path)
                .and_then(|&pos| writer.records.get(pos).map(Arc::clone))
        };

        if let Some(record) = existing {
            // idempotent metadata refresh, no snapshot swap needed
            if !record.refresh_metadata() {
                warn!(path = %path.display(), "Stat failed for updated file, removing");
                self.remove_path(path);
            }
            return;
        }

        let Ok(meta) = std::fs::symlink_metadata(path) else {
            return;
        };
        let is_symlink = meta.file_type().is_symlink();
        if is_symlink {
            match std::fs::metadata(path) {
                Ok(target) if target.is_file() => {}
                _ => return,
            }
        } else if !meta.is_file() {
            return;
        }

        let base = self.base_path();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(FileRecord::from_fs(id, path.to_path_buf(), &base, is_symlink));
        if let Some(store) = frecency {
            record.set_frecency_score(store.score_for(&record.path));
        }

        let generation = self.generation();
        let mut writer = self.writer.lock();
        if writer.insert(record) {
            self.publish_locked(&writer, generation);
        }
    }

    fn remove_path(&self, path: &Path) {
        let generation = self.generation();
        let mut writer = self.writer.lock();
        let removed = if writer.remove(path) {
            1
        } else {
            // a directory deletion arrives as a single event for its root
            writer.remove_subtree(path)
        };
        if removed > 0 {
            debug!(removed, path = %path.display(), "Removed from index");
            self.publish_locked(&writer, generation);
        }
    }

    /// Re-walk the base and swap the result in atomically.
    pub fn rescan(&self, frecency: Option<Arc<FrecencyStore>>) -> Result<()> {
        self.scan(frecency, false)
    }

    /// Point the index at a new base: bumps the generation, clears records
    /// and runs a fresh incremental scan.
    pub fn restart(
        &self,
        new_base: impl AsRef<Path>,
        frecency: Option<Arc<FrecencyStore>>,
    ) -> Result<()> {
        let canonical = path_utils::canonicalize(new_base.as_ref())
            .map_err(|_| Error::InvalidBase(new_base.as_ref().to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(Error::InvalidBase(canonical));
        }

        info!(new_base = %canonical.display(), "Restarting index");
        *self.base.write() = canonical;
        self.scan(frecency, true)
    }
}

/// Per-thread buffer of freshly scanned records; flushes to the shared
/// state in batches and on drop.
struct FlushBuffer<'a> {
    index: &'a FileIndex,
    staging: &'a Mutex<Vec<Arc<FileRecord>>>,
    generation: u64,
    incremental: bool,
    local: Vec<Arc<FileRecord>>,
}

impl FlushBuffer<'_> {
    fn push(&mut self, record: Arc<FileRecord>) {
        self.local.push(record);
        if self.local.len() >= FLUSH_BATCH {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.local.is_empty() {
            return;
        }
        self.index
            .scanned_count
            .fetch_add(self.local.len(), Ordering::Relaxed);

        if self.incremental {
            let mut writer = self.index.writer.lock();
            for record in self.local.drain(..) {
                writer.insert(record);
            }
            self.index.publish_locked(&writer, self.generation);
        } else {
            self.staging.lock().append(&mut self.local);
        }
    }
}

impl Drop for FlushBuffer<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[inline]
fn is_git_path(path: &Path) -> bool {
    path.components()
        .any(|component| component.as_os_str() == ".git")
}
