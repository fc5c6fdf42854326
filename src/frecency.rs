//! Persistent frecency: how often and how recently each file was opened.
//!
//! Access events live in an embedded LMDB database keyed by the canonical
//! absolute path; a sharded in-memory cache mirrors it so the scoring path
//! never touches disk. When the database cannot be opened the store keeps
//! working cache-only and the picker carries on with in-memory frecency.

use crate::error::{Error, Result};
use ahash::AHashMap;
use heed::types::{Bytes, SerdeBincode};
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::hash::{BuildHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Retained access instants per file. Older events age out of the ring but
/// stay represented through `access_count`.
const MAX_TIMESTAMPS: usize = 10;
/// Weight of a just-now access.
const WEIGHT_BASE: f64 = 100.0;
/// Decay constant: an access is worth ~a third after three days.
const DECAY_TAU_SECS: f64 = 259_200.0;
/// Weight of the log-frequency term.
const FREQ_WEIGHT: f64 = 10.0;

const DB_NAME: &str = "file_access";
const SHARD_COUNT: usize = 16;

/// One file's access history, persisted as bincode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessEntry {
    pub access_count: u32,
    pub timestamps: VecDeque<i64>,
}

impl AccessEntry {
    fn record(&mut self, now: i64) {
        self.access_count = self.access_count.saturating_add(1);
        self.timestamps.push_back(now);
        while self.timestamps.len() > MAX_TIMESTAMPS {
            self.timestamps.pop_front();
        }
    }

    /// Exponentially decayed sum over the retained ring plus a
    /// log-frequency term, reduced to a non-negative integer.
    pub fn score_at(&self, now: i64) -> i64 {
        let decayed: i64 = self
            .timestamps
            .iter()
            .map(|&t| {
                let age = (now - t).max(0) as f64;
                (WEIGHT_BASE * (-age / DECAY_TAU_SECS).exp()).floor() as i64
            })
            .sum();
        let frequency = (FREQ_WEIGHT * (1.0 + self.access_count as f64).ln()).floor() as i64;

        (decayed + frequency).max(0)
    }
}

struct DbHandle {
    env: Env,
    db: Database<Bytes, SerdeBincode<AccessEntry>>,
    path: PathBuf,
}

/// Frecency store: sharded in-memory map, optionally backed by LMDB.
pub struct FrecencyStore {
    handle: RwLock<Option<DbHandle>>,
    shards: Vec<Mutex<AHashMap<PathBuf, AccessEntry>>>,
    hasher: ahash::RandomState,
    failed_writes: AtomicU64,
}

/// Health surface reported by the coordinator.
#[derive(Debug, Clone)]
pub struct StoreHealth {
    pub db_path: Option<String>,
    pub disk_size: u64,
    pub entries: u64,
    pub failed_writes: u64,
}

impl std::fmt::Debug for FrecencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrecencyStore")
            .field("persistent", &self.handle.read().is_some())
            .field(
                "failed_writes",
                &self.failed_writes.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl FrecencyStore {
    /// Cache-only store; used when persistence is disabled or unavailable.
    pub fn in_memory() -> Self {
        Self {
            handle: RwLock::new(None),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(AHashMap::new())).collect(),
            hasher: ahash::RandomState::new(),
            failed_writes: AtomicU64::new(0),
        }
    }

    /// Open (or create) the database at `db_path` and load its entries.
    pub fn open(db_path: &Path, create_if_missing: bool) -> Result<Self> {
        let store = Self::in_memory();
        store.attach_db(db_path, create_if_missing)?;
        Ok(store)
    }

    /// Attach a database to a running store, merging persisted entries into
    /// the cache. Replaces any previously attached database.
    pub fn attach_db(&self, db_path: &Path, create_if_missing: bool) -> Result<()> {
        if create_if_missing {
            std::fs::create_dir_all(db_path).map_err(Error::CreateDir)?;
        } else if !db_path.is_dir() {
            return Err(Error::CreateDir(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("frecency database directory missing: {}", db_path.display()),
            )));
        }

        let env = unsafe {
            let mut opts = EnvOpenOptions::new();
            opts.max_dbs(4);
            opts.open(db_path).map_err(Error::DbUnavailable)?
        };
        env.clear_stale_readers()
            .map_err(Error::DbClearStaleReaders)?;

        let mut wtxn = env.write_txn().map_err(Error::DbStartWriteTxn)?;
        let db = env
            .create_database(&mut wtxn, Some(DB_NAME))
            .map_err(Error::DbCreate)?;
        wtxn.commit().map_err(Error::DbCommit)?;

        self.load_entries(&env, &db)?;

        let mut handle = self.handle.write();
        *handle = Some(DbHandle {
            env,
            db,
            path: db_path.to_path_buf(),
        });
        info!("Frecency database attached at {}", db_path.display());
        Ok(())
    }

    /// Load every persisted entry into the shards. A store written by an
    /// incompatible version fails to decode; it is cleared rather than
    /// carried forward.
    fn load_entries(
        &self,
        env: &Env,
        db: &Database<Bytes, SerdeBincode<AccessEntry>>,
    ) -> Result<()> {
        let rtxn = env.read_txn().map_err(Error::DbStartReadTxn)?;
        let mut loaded = 0usize;
        let mut corrupt = false;

        match db.iter(&rtxn) {
            Ok(iter) => {
                for item in iter {
                    match item {
                        Ok((key, entry)) => {
                            let path = PathBuf::from(String::from_utf8_lossy(key).into_owned());
                            self.shard_for(&path).lock().insert(path, entry);
                            loaded += 1;
                        }
                        Err(e) => {
                            warn!(?e, "Undecodable frecency entry, clearing store");
                            corrupt = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => return Err(Error::DbRead(e)),
        }
        drop(rtxn);

        if corrupt {
            for shard in &self.shards {
                shard.lock().clear();
            }
            let mut wtxn = env.write_txn().map_err(Error::DbStartWriteTxn)?;
            db.clear(&mut wtxn).map_err(Error::DbWrite)?;
            wtxn.commit().map_err(Error::DbCommit)?;
            return Ok(());
        }

        debug!(loaded, "Loaded frecency entries");
        Ok(())
    }

    fn shard_for(&self, path: &Path) -> &Mutex<AHashMap<PathBuf, AccessEntry>> {
        let mut hasher = self.hasher.build_hasher();
        path.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    /// Record an access right now and return the file's updated score.
    pub fn track_access(&self, path: &Path) -> i64 {
        self.track_access_at(path, crate::path_utils::unix_now_secs() as i64)
    }

    /// Clock-injected variant of [`track_access`](Self::track_access).
    ///
    /// The cache update is synchronous; callers that care about write
    /// latency persist through [`persist_entry`](Self::persist_entry) off
    /// the hot path.
    pub fn track_access_at(&self, path: &Path, now: i64) -> i64 {
        let mut shard = self.shard_for(path).lock();
        let entry = shard.entry(path.to_path_buf()).or_default();
        entry.record(now);
        entry.score_at(now)
    }

    /// Write one cached entry through to the database. Failures are counted
    /// and logged, never surfaced: losing a frecency write must not break
    /// the access that triggered it.
    pub fn persist_entry(&self, path: &Path) {
        let entry = {
            let shard = self.shard_for(path).lock();
            match shard.get(path) {
                Some(entry) => entry.clone(),
                None => return,
            }
        };

        let handle = self.handle.read();
        let Some(handle) = handle.as_ref() else {
            return;
        };

        let result = (|| -> Result<()> {
            let mut wtxn = handle.env.write_txn().map_err(Error::DbStartWriteTxn)?;
            handle
                .db
                .put(&mut wtxn, path.to_string_lossy().as_bytes(), &entry)
                .map_err(Error::DbWrite)?;
            wtxn.commit().map_err(Error::DbCommit)?;
            Ok(())
        })();

        if let Err(e) = result {
            self.failed_writes.fetch_add(1, Ordering::Relaxed);
            warn!(?e, path = %path.display(), "Failed to persist frecency entry");
        }
    }

    /// Current score for a path; zero when it was never accessed.
    pub fn score_for(&self, path: &Path) -> i64 {
        self.score_for_at(path, crate::path_utils::unix_now_secs() as i64)
    }

    pub fn score_for_at(&self, path: &Path, now: i64) -> i64 {
        let shard = self.shard_for(path).lock();
        shard.get(path).map_or(0, |entry| entry.score_at(now))
    }

    /// Drop every entry, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        for shard in &self.shards {
            shard.lock().clear();
        }

        let handle = self.handle.read();
        if let Some(handle) = handle.as_ref() {
            let mut wtxn = handle.env.write_txn().map_err(Error::DbStartWriteTxn)?;
            handle.db.clear(&mut wtxn).map_err(Error::DbWrite)?;
            wtxn.commit().map_err(Error::DbCommit)?;
        }
        Ok(())
    }

    /// Force pending database pages to disk; called on shutdown.
    pub fn flush(&self) {
        let handle = self.handle.read();
        if let Some(handle) = handle.as_ref()
            && let Err(e) = handle.env.force_sync()
        {
            warn!(?e, "Failed to sync frecency database");
        }
    }

    pub fn health(&self) -> StoreHealth {
        let handle = self.handle.read();
        let (db_path, disk_size, entries) = match handle.as_ref() {
            Some(handle) => {
                let size = handle.env.real_disk_size().unwrap_or(0);
                let entries = handle
                    .env
                    .read_txn()
                    .ok()
                    .and_then(|rtxn| handle.db.len(&rtxn).ok())
                    .unwrap_or(0);
                (
                    Some(handle.path.to_string_lossy().into_owned()),
                    size,
                    entries,
                )
            }
            None => {
                let cached: usize = self.shards.iter().map(|s| s.lock().len()).sum();
                (None, 0, cached as u64)
            }
        };

        StoreHealth {
            db_path,
            disk_size,
            entries,
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
        }
    }
}

/// Small increment for files modified recently, scaled by age. Feeds the
/// git bonus for worktree files.
pub fn modification_recency(modified_secs: u64, now: u64) -> i32 {
    let age = now.saturating_sub(modified_secs);
    if age < 3_600 {
        8
    } else if age < 86_400 {
        4
    } else if age < 604_800 {
        2
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn ring_is_bounded_and_count_keeps_growing() {
        let mut entry = AccessEntry::default();
        for i in 0..25 {
            entry.record(NOW + i);
        }
        assert_eq!(entry.timestamps.len(), MAX_TIMESTAMPS);
        assert_eq!(entry.access_count, 25);
        assert_eq!(*entry.timestamps.front().unwrap(), NOW + 15);
    }

    #[test]
    fn recent_accesses_score_higher_than_stale_ones() {
        let store = FrecencyStore::in_memory();
        let fresh = Path::new("/repo/fresh.rs");
        let stale = Path::new("/repo/stale.rs");

        store.track_access_at(fresh, NOW - 60);
        store.track_access_at(stale, NOW - 14 * 86_400);

        assert!(store.score_for_at(fresh, NOW) > store.score_for_at(stale, NOW));
        assert!(store.score_for_at(stale, NOW) >= 0);
    }

    #[test]
    fn repeated_access_raises_the_score() {
        let store = FrecencyStore::in_memory();
        let once = Path::new("/repo/once.rs");
        let many = Path::new("/repo/many.rs");

        store.track_access_at(once, NOW - 30);
        for i in 0..5 {
            store.track_access_at(many, NOW - 30 + i);
        }

        assert!(store.score_for_at(many, NOW) > store.score_for_at(once, NOW));
    }

    #[test]
    fn unknown_path_scores_zero() {
        let store = FrecencyStore::in_memory();
        assert_eq!(store.score_for_at(Path::new("/nope"), NOW), 0);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let file = Path::new("/repo/src/main.rs");

        {
            let store = FrecencyStore::open(dir.path(), true).unwrap();
            for i in 0..3 {
                store.track_access_at(file, NOW + i);
            }
            store.persist_entry(file);
            store.flush();
        }

        let reopened = FrecencyStore::open(dir.path(), true).unwrap();
        let score = reopened.score_for_at(file, NOW + 10);
        assert!(score > 0, "persisted entry should reload, got {score}");
    }

    #[test]
    fn replaying_accesses_reproduces_the_score() {
        let store_a = FrecencyStore::in_memory();
        let store_b = FrecencyStore::in_memory();
        let file = Path::new("/repo/replay.rs");

        let instants = [NOW - 500, NOW - 400, NOW - 60, NOW - 10];
        for &t in &instants {
            store_a.track_access_at(file, t);
            store_b.track_access_at(file, t);
        }

        assert_eq!(store_a.score_for_at(file, NOW), store_b.score_for_at(file, NOW));
    }

    #[test]
    fn clear_truncates_cache_and_db() {
        let dir = TempDir::new().unwrap();
        let store = FrecencyStore::open(dir.path(), true).unwrap();
        let file = Path::new("/repo/src/lib.rs");

        store.track_access_at(file, NOW);
        store.persist_entry(file);
        assert!(store.score_for_at(file, NOW) > 0);

        store.clear().unwrap();
        assert_eq!(store.score_for_at(file, NOW), 0);
        assert_eq!(store.health().entries, 0);
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(FrecencyStore::open(&missing, false).is_err());
    }

    #[test]
    fn modification_recency_steps_down_with_age() {
        let now = NOW as u64;
        assert_eq!(modification_recency(now - 100, now), 8);
        assert_eq!(modification_recency(now - 7_200, now), 4);
        assert_eq!(modification_recency(now - 2 * 86_400, now), 2);
        assert_eq!(modification_recency(now - 30 * 86_400, now), 0);
        assert_eq!(modification_recency(0, now), 0);
    }

    #[test]
    fn health_reports_failed_writes_counter() {
        let store = FrecencyStore::in_memory();
        let health = store.health();
        assert_eq!(health.failed_writes, 0);
        assert!(health.db_path.is_none());
    }
}
