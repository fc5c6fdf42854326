//! Core data model: indexed file records, git status taxonomy, snapshots
//! and search results.

use smallvec::SmallVec;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

/// Per-file git state, merged from index-vs-HEAD and worktree-vs-index bits.
///
/// `Unknown` is the state of every record until the first refresh, and of
/// files outside the worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GitFileStatus {
    Unknown = 0,
    Ignored = 1,
    Deleted = 2,
    Clean = 3,
    Conflicted = 4,
    Renamed = 5,
    Untracked = 6,
    Added = 7,
    Modified = 8,
}

impl GitFileStatus {
    pub fn from_git2(status: git2::Status) -> Self {
        use git2::Status as S;

        if status.contains(S::CONFLICTED) {
            Self::Conflicted
        } else if status.contains(S::WT_NEW) {
            Self::Untracked
        } else if status.intersects(S::WT_RENAMED | S::INDEX_RENAMED) {
            Self::Renamed
        } else if status.intersects(S::WT_DELETED | S::INDEX_DELETED) {
            Self::Deleted
        } else if status.intersects(
            S::WT_MODIFIED | S::INDEX_MODIFIED | S::WT_TYPECHANGE | S::INDEX_TYPECHANGE,
        ) {
            Self::Modified
        } else if status.contains(S::INDEX_NEW) {
            Self::Added
        } else if status.contains(S::IGNORED) {
            Self::Ignored
        } else {
            // CURRENT or an empty bitset from an include-unmodified query
            Self::Clean
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ignored,
            2 => Self::Deleted,
            3 => Self::Clean,
            4 => Self::Conflicted,
            5 => Self::Renamed,
            6 => Self::Untracked,
            7 => Self::Added,
            8 => Self::Modified,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ignored => "ignored",
            Self::Deleted => "deleted",
            Self::Clean => "clean",
            Self::Conflicted => "conflicted",
            Self::Renamed => "renamed",
            Self::Untracked => "untracked",
            Self::Added => "added",
            Self::Modified => "modified",
        }
    }

    /// Fixed ranking increment, ordered
    /// modified > added > untracked > renamed > conflicted > clean >
    /// deleted > ignored > unknown.
    pub fn rank_bonus(self) -> i32 {
        match self {
            Self::Modified => 32,
            Self::Added => 28,
            Self::Untracked => 24,
            Self::Renamed => 20,
            Self::Conflicted => 16,
            Self::Clean => 12,
            Self::Deleted => 8,
            Self::Ignored => 4,
            Self::Unknown => 0,
        }
    }

    /// Whether the file carries uncommitted work. Used to soften the
    /// current-file demotion: an actively edited buffer should not vanish
    /// entirely from its own search results.
    pub fn is_dirty(self) -> bool {
        matches!(
            self,
            Self::Modified | Self::Added | Self::Untracked | Self::Renamed | Self::Conflicted
        )
    }
}

/// One indexed file.
///
/// Identity fields are immutable for the record's lifetime. Fields the
/// scanner, watcher, git tracker and frecency updater all write are atomics,
/// so a record shared inside an immutable snapshot takes idempotent updates
/// without tearing and without a lock on the read path.
#[derive(Debug)]
pub struct FileRecord {
    /// Dense id, stable within a single index generation.
    pub id: u32,
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Path relative to the index base.
    pub relative_path: String,
    /// Final path component.
    pub name: String,
    /// Lowercase extension, possibly empty.
    pub extension: String,
    pub is_symlink: bool,
    size: AtomicU64,
    modified: AtomicU64,
    git_status: AtomicU8,
    frecency: AtomicI64,
}

impl FileRecord {
    pub fn new_raw(
        id: u32,
        path: PathBuf,
        relative_path: String,
        size: u64,
        modified: u64,
        is_symlink: bool,
    ) -> Self {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self {
            id,
            path,
            relative_path,
            name,
            extension,
            is_symlink,
            size: AtomicU64::new(size),
            modified: AtomicU64::new(modified),
            git_status: AtomicU8::new(GitFileStatus::Unknown as u8),
            frecency: AtomicI64::new(0),
        }
    }

    /// Stat `path` and build a record for it. Metadata errors degrade to
    /// zeroed size/mtime rather than failing the caller.
    pub fn from_fs(id: u32, path: PathBuf, base: &Path, is_symlink: bool) -> Self {
        let relative_path = crate::path_utils::relative_to(base, &path);

        let (size, modified) = match std::fs::metadata(&path) {
            Ok(metadata) => {
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs());
                (metadata.len(), modified)
            }
            Err(_) => (0, 0),
        };

        Self::new_raw(id, path, relative_path, size, modified, is_symlink)
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn modified(&self) -> u64 {
        self.modified.load(Ordering::Relaxed)
    }

    pub fn git_status(&self) -> GitFileStatus {
        GitFileStatus::from_u8(self.git_status.load(Ordering::Relaxed))
    }

    pub fn frecency_score(&self) -> i64 {
        self.frecency.load(Ordering::Relaxed)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Relaxed);
    }

    pub fn set_modified(&self, modified: u64) {
        self.modified.store(modified, Ordering::Relaxed);
    }

    /// Store a new git status, returning whether it differed from the old one.
    pub fn set_git_status(&self, status: GitFileStatus) -> bool {
        self.git_status.swap(status as u8, Ordering::Relaxed) != status as u8
    }

    pub fn set_frecency_score(&self, score: i64) {
        self.frecency.store(score, Ordering::Relaxed);
    }

    /// Byte offset of the file name within `relative_path`.
    pub fn name_start(&self) -> usize {
        self.relative_path.len().saturating_sub(self.name.len())
    }

    /// Refresh size/mtime from the filesystem; returns false when the stat
    /// fails (e.g. the file vanished between the event and the update).
    pub fn refresh_metadata(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(metadata) => {
                self.set_size(metadata.len());
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs());
                if modified > self.modified() {
                    self.set_modified(modified);
                }
                true
            }
            Err(_) => false,
        }
    }
}

/// Immutable view of the index at a point in time, safe to share across
/// threads. Obtained from [`crate::index::FileIndex::snapshot`].
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    /// Bumped on every full (re)scan; ids from older generations are stale.
    pub generation: u64,
    pub records: Vec<Arc<FileRecord>>,
}

impl IndexSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Normalized filesystem change consumed by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Byte offsets into `relative_path` witnessing a fuzzy match.
pub type MatchPositions = SmallVec<[u32; 16]>;

/// Component breakdown of a ranked result.
#[derive(Debug, Clone)]
pub struct Score {
    pub total: i32,
    pub fuzzy: i32,
    pub path_bonus: i32,
    pub frecency_bonus: i32,
    pub git_bonus: i32,
    pub current_file_bonus: i32,
    pub exact: bool,
    pub match_kind: &'static str,
    pub positions: MatchPositions,
}

/// Everything a single ranking pass needs, assembled by the coordinator.
#[derive(Debug)]
pub struct ScoringContext<'a> {
    pub query: &'a str,
    pub current_file: Option<&'a str>,
    pub cwd: Option<&'a Path>,
    pub max_results: usize,
    pub min_score: i32,
    /// Wall-clock seconds, sampled once per query.
    pub now: u64,
    pub in_worktree: bool,
    /// Shared search epoch; a newer query bumps it to cancel this one.
    pub epoch: &'a std::sync::atomic::AtomicU64,
    /// Epoch value this query was issued with.
    pub query_id: u64,
}

impl ScoringContext<'_> {
    pub fn is_cancelled(&self) -> bool {
        self.epoch.load(Ordering::Acquire) != self.query_id
    }
}

/// Result of one query: items and scores are index-aligned, best first.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub items: Vec<Arc<FileRecord>>,
    pub scores: Vec<Score>,
    /// Matches that passed the cutoff, including those beyond `max_results`.
    pub total_matched: usize,
    pub total_files: usize,
    pub generation: u64,
    pub query_duration_ms: u64,
}

/// Progress of the initial (or a triggered) scan.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub scanned_files_count: usize,
    pub is_scanning: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Status;

    #[test]
    fn status_merge_prefers_conflicts_then_worktree_bits() {
        assert_eq!(
            GitFileStatus::from_git2(Status::CONFLICTED | Status::WT_MODIFIED),
            GitFileStatus::Conflicted
        );
        assert_eq!(
            GitFileStatus::from_git2(Status::WT_NEW),
            GitFileStatus::Untracked
        );
        assert_eq!(
            GitFileStatus::from_git2(Status::INDEX_NEW | Status::WT_MODIFIED),
            GitFileStatus::Modified
        );
        assert_eq!(
            GitFileStatus::from_git2(Status::INDEX_NEW),
            GitFileStatus::Added
        );
        assert_eq!(
            GitFileStatus::from_git2(Status::CURRENT),
            GitFileStatus::Clean
        );
        assert_eq!(
            GitFileStatus::from_git2(Status::empty()),
            GitFileStatus::Clean
        );
    }

    #[test]
    fn status_rank_bonus_is_strictly_ordered() {
        let order = [
            GitFileStatus::Modified,
            GitFileStatus::Added,
            GitFileStatus::Untracked,
            GitFileStatus::Renamed,
            GitFileStatus::Conflicted,
            GitFileStatus::Clean,
            GitFileStatus::Deleted,
            GitFileStatus::Ignored,
            GitFileStatus::Unknown,
        ];
        for pair in order.windows(2) {
            assert!(
                pair[0].rank_bonus() > pair[1].rank_bonus(),
                "{:?} should outrank {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn status_roundtrips_through_u8() {
        for status in [
            GitFileStatus::Unknown,
            GitFileStatus::Ignored,
            GitFileStatus::Deleted,
            GitFileStatus::Clean,
            GitFileStatus::Conflicted,
            GitFileStatus::Renamed,
            GitFileStatus::Untracked,
            GitFileStatus::Added,
            GitFileStatus::Modified,
        ] {
            assert_eq!(GitFileStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn record_status_update_reports_change() {
        let record = FileRecord::new_raw(
            0,
            PathBuf::from("/repo/src/main.rs"),
            "src/main.rs".to_string(),
            10,
            100,
            false,
        );
        assert_eq!(record.git_status(), GitFileStatus::Unknown);
        assert!(record.set_git_status(GitFileStatus::Modified));
        assert!(!record.set_git_status(GitFileStatus::Modified));
        assert_eq!(record.git_status(), GitFileStatus::Modified);
        assert_eq!(record.name, "main.rs");
        assert_eq!(record.extension, "rs");
        assert_eq!(record.name_start(), 4);
    }
}
