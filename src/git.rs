//! Per-file git status for the indexed worktree.

use crate::error::{Error, Result};
use crate::types::GitFileStatus;
use git2::{Repository, StatusOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One status query, resolved to absolute paths and sorted for lookup.
#[derive(Debug, Clone)]
pub struct GitStatusSnapshot(Vec<(PathBuf, GitFileStatus)>);

impl GitStatusSnapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn lookup(&self, full_path: &Path) -> Option<GitFileStatus> {
        self.0
            .binary_search_by(|(path, _)| path.as_path().cmp(full_path))
            .ok()
            .map(|idx| self.0[idx].1)
    }

    fn read(repo: &Repository, status_options: &mut StatusOptions) -> Result<Self> {
        let statuses = repo.statuses(Some(status_options))?;
        let Some(workdir) = repo.workdir() else {
            // bare repository, nothing to report
            return Ok(Self(Vec::new()));
        };

        let mut entries = Vec::with_capacity(statuses.len());
        for entry in statuses.iter() {
            if let Some(entry_path) = entry.path() {
                entries.push((
                    workdir.join(entry_path),
                    GitFileStatus::from_git2(entry.status()),
                ));
            }
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        Ok(Self(entries))
    }
}

/// Locates the worktree enclosing the index base and applies statuses onto
/// file records. Inert when the base is not inside a repository.
#[derive(Debug, Clone, Default)]
pub struct GitTracker {
    workdir: Option<PathBuf>,
}

impl GitTracker {
    /// Find the enclosing working tree, if any. Never fails: a base outside
    /// any repository simply produces an inert tracker.
    pub fn discover(base_path: &Path) -> Self {
        let workdir = Repository::discover(base_path)
            .ok()
            .and_then(|repo| repo.workdir().map(Path::to_path_buf));

        match &workdir {
            Some(dir) => debug!("Git repository found at {}", dir.display()),
            None => debug!("No git repository for {}", base_path.display()),
        }

        Self { workdir }
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.workdir.is_some()
    }

    /// Fetch the full status of the worktree.
    ///
    /// Includes unmodified files so that records whose changes were just
    /// committed or stashed drop back to clean.
    pub fn read_status(&self) -> Result<Option<GitStatusSnapshot>> {
        let Some(workdir) = self.workdir.as_deref() else {
            return Ok(None);
        };

        let repo = Repository::open(workdir).map_err(Error::GitUnavailable)?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_unmodified(true)
            .exclude_submodules(true);

        let snapshot =
            GitStatusSnapshot::read(&repo, &mut options).map_err(|e| match e {
                Error::Git(source) => Error::GitUnavailable(source),
                other => other,
            })?;
        Ok(Some(snapshot))
    }

    /// Refresh git status across the given records, returning how many
    /// records actually changed state.
    ///
    /// The status read happens without touching the index; each update goes
    /// through the record's atomic store, so concurrent readers see old or
    /// new values but never torn ones.
    pub fn refresh(&self, records: &[std::sync::Arc<crate::types::FileRecord>]) -> Result<usize> {
        let Some(snapshot) = self.read_status()? else {
            return Ok(0);
        };
        let workdir = self.workdir.as_deref().unwrap_or(Path::new(""));

        let mut changed = 0usize;
        for record in records {
            let status = if record.path.starts_with(workdir) {
                // a worktree file absent from an include-unmodified status
                // listing is clean
                snapshot.lookup(&record.path).unwrap_or(GitFileStatus::Clean)
            } else {
                GitFileStatus::Unknown
            };

            if record.set_git_status(status) {
                changed += 1;
            }
        }

        if changed > 0 {
            debug!(changed, statuses = snapshot.len(), "Applied git statuses");
        }
        Ok(changed)
    }
}

/// Status of a single worktree file, queried directly instead of walking
/// the whole tree. Used by the watcher path where one file changed.
/// Lenient: any failure reads as "no status available".
pub fn status_for_file(workdir: &Path, path: &Path) -> Option<GitFileStatus> {
    let repo = Repository::open(workdir).ok()?;
    let rel = path.strip_prefix(workdir).ok()?;
    let status = repo.status_file(rel).ok()?;
    Some(GitFileStatus::from_git2(status))
}

/// Does a change under `.git/` affect file statuses? Object and log writes
/// do not; index, HEAD, refs and merge-state files do.
pub fn is_status_affecting_git_path(changed: &Path, git_dir: &Path) -> bool {
    let Ok(rel) = changed.strip_prefix(git_dir) else {
        return false;
    };

    if rel.starts_with("objects") || rel.starts_with("logs") || rel.starts_with("hooks") {
        return false;
    }
    if rel == Path::new("index") || rel == Path::new("index.lock") {
        return true;
    }
    if rel == Path::new("HEAD") {
        return true;
    }
    if rel.starts_with("refs") || rel == Path::new("packed-refs") {
        return true;
    }
    if rel == Path::new("info/exclude") || rel == Path::new("info/sparse-checkout") {
        return true;
    }
    if let Some(fname) = rel.file_name().and_then(|f| f.to_str())
        && matches!(fname, "MERGE_HEAD" | "CHERRY_PICK_HEAD" | "REVERT_HEAD")
    {
        return true;
    }

    false
}

/// Best-effort refresh used from background paths where an error must not
/// take anything down.
pub fn refresh_quietly(
    tracker: &GitTracker,
    records: &[std::sync::Arc<crate::types::FileRecord>],
) {
    if let Err(e) = tracker.refresh(records) {
        warn!(?e, "Background git refresh failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_outside_any_repo_is_inert() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracker = GitTracker::discover(dir.path());
        assert!(!tracker.is_active());
        assert!(tracker.read_status().unwrap().is_none());
        assert_eq!(tracker.refresh(&[]).unwrap(), 0);
    }

    #[test]
    fn snapshot_lookup_uses_sorted_order() {
        let snapshot = GitStatusSnapshot(vec![
            (PathBuf::from("/repo/a.rs"), GitFileStatus::Modified),
            (PathBuf::from("/repo/b.rs"), GitFileStatus::Clean),
            (PathBuf::from("/repo/z.rs"), GitFileStatus::Untracked),
        ]);

        assert_eq!(
            snapshot.lookup(Path::new("/repo/b.rs")),
            Some(GitFileStatus::Clean)
        );
        assert_eq!(snapshot.lookup(Path::new("/repo/missing.rs")), None);
    }

    #[test]
    fn git_dir_classification() {
        let git_dir = Path::new("/repo/.git");
        assert!(is_status_affecting_git_path(
            Path::new("/repo/.git/index"),
            git_dir
        ));
        assert!(is_status_affecting_git_path(
            Path::new("/repo/.git/HEAD"),
            git_dir
        ));
        assert!(is_status_affecting_git_path(
            Path::new("/repo/.git/refs/heads/main"),
            git_dir
        ));
        assert!(is_status_affecting_git_path(
            Path::new("/repo/.git/MERGE_HEAD"),
            git_dir
        ));
        assert!(!is_status_affecting_git_path(
            Path::new("/repo/.git/objects/ab/cdef"),
            git_dir
        ));
        assert!(!is_status_affecting_git_path(
            Path::new("/repo/src/main.rs"),
            git_dir
        ));
    }
}
