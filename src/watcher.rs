//! Background filesystem watcher.
//!
//! Raw notify events are debounced, normalized into [`FsEvent`]s and pushed
//! into a bounded queue the coordinator drains. Overflow drops the oldest
//! change and schedules a full rescan instead of blocking the watcher
//! callback.

use crate::error::Result;
use crate::git;
use crate::index::IgnorePredicate;
use crate::types::FsEvent;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, NoCache, new_debouncer_opt};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Debouncer = notify_debouncer_full::Debouncer<notify::RecommendedWatcher, NoCache>;

/// Rapid repeat events per path are coalesced over this window.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(75);
/// One batch touching more paths than this is cheaper to handle as a rescan.
const MAX_PATHS_PER_BATCH: usize = 1024;
/// Queue capacity; beyond it the oldest event is dropped.
const QUEUE_CAPACITY: usize = 512;

/// Message drained by the coordinator's index thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    Event(FsEvent),
    FullRescan,
    GitRefresh,
    Shutdown,
}

/// Bounded FIFO between the watcher callback and the drain thread.
pub struct EventQueue {
    inner: Mutex<VecDeque<WatchMessage>>,
    cond: Condvar,
    capacity: usize,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(64)),
            cond: Condvar::new(),
            capacity: QUEUE_CAPACITY,
        })
    }

    /// Enqueue a message. On overflow the oldest change event is dropped
    /// and a full rescan is scheduled to recover whatever was lost.
    pub fn push(&self, message: WatchMessage) {
        let mut queue = self.inner.lock();

        // control messages don't pile up
        if matches!(
            message,
            WatchMessage::FullRescan | WatchMessage::GitRefresh | WatchMessage::Shutdown
        ) && queue.back() == Some(&message)
        {
            return;
        }

        if queue.len() >= self.capacity {
            let dropped = queue.pop_front();
            warn!(?dropped, "Event queue full, scheduling full rescan");
            if !queue.contains(&WatchMessage::FullRescan) {
                queue.push_back(WatchMessage::FullRescan);
            }
        }

        queue.push_back(message);
        drop(queue);
        self.cond.notify_one();
    }

    /// Block for up to `timeout` waiting for the next message.
    pub fn pop(&self, timeout: Duration) -> Option<WatchMessage> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.cond.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Owns the debouncer; dropping it (or calling [`stop`](Self::stop)) ends
/// event delivery. Stop is idempotent.
pub struct IndexWatcher {
    debouncer: Mutex<Option<Debouncer>>,
}

impl IndexWatcher {
    pub fn spawn(
        base_path: PathBuf,
        git_workdir: Option<PathBuf>,
        ignore: IgnorePredicate,
        queue: Arc<EventQueue>,
    ) -> Result<Self> {
        // following symlinks would replay events for files outside the base
        let config = Config::default().with_follow_symlinks(false);
        let handler_base = base_path.clone();

        let mut debouncer = new_debouncer_opt(
            DEBOUNCE_WINDOW,
            Some(DEBOUNCE_WINDOW / 2),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    normalize_events(&events, &handler_base, &git_workdir, &ignore, &queue);
                }
                Err(errors) => {
                    error!(?errors, "File watcher errors");
                }
            },
            // the recommended cache tracks every watched file, which we do
            // not need: renames always re-enter through the index anyway
            NoCache::new(),
            config,
        )?;

        debouncer.watch(base_path.as_path(), RecursiveMode::Recursive)?;
        info!(base = %base_path.display(), "File watcher started");

        Ok(Self {
            debouncer: Mutex::new(Some(debouncer)),
        })
    }

    pub fn stop(&self) {
        let taken = self.debouncer.lock().take();
        if taken.is_some() {
            info!("File watcher stopped");
        }
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Translate one debounced batch into queue messages.
fn normalize_events(
    events: &[DebouncedEvent],
    base_path: &Path,
    git_workdir: &Option<PathBuf>,
    ignore: &IgnorePredicate,
    queue: &EventQueue,
) {
    let git_dir = git_workdir.as_ref().map(|w| w.join(".git"));
    let mut need_git_refresh = false;
    let mut affected = 0usize;

    for debounced in events {
        // reads and preview opens must not feed back into the index
        if matches!(
            debounced.event.kind,
            EventKind::Access(
                AccessKind::Read
                    | AccessKind::Open(_)
                    | AccessKind::Close(AccessMode::Read | AccessMode::Execute)
            )
        ) {
            continue;
        }

        // the kernel dropped events and told us to re-scan the subtree
        if debounced.event.need_rescan() {
            warn!(paths = ?debounced.event.paths, "Kernel requested rescan");
            queue.push(WatchMessage::FullRescan);
            return;
        }

        affected += debounced.event.paths.len();
        if affected > MAX_PATHS_PER_BATCH {
            warn!(affected, "Oversized event batch, scheduling full rescan");
            queue.push(WatchMessage::FullRescan);
            return;
        }

        // a rename with both endpoints is worth preserving as such
        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = debounced.event.kind
            && debounced.event.paths.len() >= 2
        {
            let from = debounced.event.paths[0].clone();
            let to = debounced.event.paths[1].clone();
            if !is_event_ignored(&from, base_path, ignore)
                || !is_event_ignored(&to, base_path, ignore)
            {
                queue.push(WatchMessage::Event(FsEvent::Renamed { from, to }));
            }
            continue;
        }

        for path in &debounced.event.paths {
            if is_ignore_definition_path(path) {
                info!(path = %path.display(), "Ignore rules changed, scheduling full rescan");
                queue.push(WatchMessage::FullRescan);
                return;
            }

            if let Some(git_dir) = &git_dir
                && path.starts_with(git_dir)
            {
                if git::is_status_affecting_git_path(path, git_dir) {
                    need_git_refresh = true;
                }
                continue;
            }

            if is_event_ignored(path, base_path, ignore) {
                continue;
            }

            // Event kind alone cannot be trusted: some backends report
            // renames as plain modifications and omit removals entirely, so
            // the filesystem state decides between add/update and removal.
            let is_removal = matches!(debounced.event.kind, EventKind::Remove(_));
            let message = if is_removal || !path.exists() {
                FsEvent::Deleted(path.clone())
            } else if matches!(debounced.event.kind, EventKind::Create(_)) {
                FsEvent::Created(path.clone())
            } else {
                FsEvent::Modified(path.clone())
            };
            debug!(?message, "Queueing filesystem event");
            queue.push(WatchMessage::Event(message));
        }
    }

    if need_git_refresh {
        queue.push(WatchMessage::GitRefresh);
    }
}

fn is_event_ignored(path: &Path, base_path: &Path, ignore: &IgnorePredicate) -> bool {
    match path.strip_prefix(base_path) {
        Ok(rel) if rel.as_os_str().is_empty() => true,
        Ok(rel) => ignore(rel),
        Err(_) => true,
    }
}

fn is_ignore_definition_path(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|f| f.to_str()),
        Some(".ignore") | Some(".gitignore")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_delivers_in_order() {
        let queue = EventQueue::new();
        queue.push(WatchMessage::Event(FsEvent::Created("/a".into())));
        queue.push(WatchMessage::Event(FsEvent::Deleted("/b".into())));

        assert_eq!(
            queue.pop(Duration::from_millis(10)),
            Some(WatchMessage::Event(FsEvent::Created("/a".into())))
        );
        assert_eq!(
            queue.pop(Duration::from_millis(10)),
            Some(WatchMessage::Event(FsEvent::Deleted("/b".into())))
        );
        assert_eq!(queue.pop(Duration::from_millis(10)), None);
    }

    #[test]
    fn overflow_drops_oldest_and_schedules_rescan() {
        let queue = EventQueue::new();
        for i in 0..(QUEUE_CAPACITY + 10) {
            queue.push(WatchMessage::Event(FsEvent::Created(
                PathBuf::from(format!("/file{i}")),
            )));
        }

        assert!(queue.len() <= QUEUE_CAPACITY + 1);

        let mut saw_rescan = false;
        let mut first_event = None;
        while let Some(message) = queue.pop(Duration::from_millis(1)) {
            match message {
                WatchMessage::FullRescan => saw_rescan = true,
                WatchMessage::Event(FsEvent::Created(path)) if first_event.is_none() => {
                    first_event = Some(path);
                }
                _ => {}
            }
        }

        assert!(saw_rescan, "overflow must schedule a full rescan");
        assert_ne!(
            first_event,
            Some(PathBuf::from("/file0")),
            "the oldest event is the one dropped"
        );
    }

    #[test]
    fn duplicate_control_messages_collapse() {
        let queue = EventQueue::new();
        queue.push(WatchMessage::GitRefresh);
        queue.push(WatchMessage::GitRefresh);
        queue.push(WatchMessage::GitRefresh);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn ignore_definition_detection() {
        assert!(is_ignore_definition_path(Path::new("/repo/.gitignore")));
        assert!(is_ignore_definition_path(Path::new("/repo/sub/.ignore")));
        assert!(!is_ignore_definition_path(Path::new("/repo/main.rs")));
    }
}
