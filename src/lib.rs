//! fastpick - an in-process file-picker core.
//!
//! Maintains a live index of the files under a base directory, ranks them
//! against interactive queries with typo-resistant fuzzy matching blended
//! with path heuristics, frecency and per-file git status, and returns a
//! ranked top-K in interactive latency.
//!
//! The entry point is [`FilePicker`]: an explicitly owned value holding the
//! index, the background watcher, the frecency store and the git tracker.
//! Hosts construct one per base directory and call its methods; searching
//! is safe concurrently with background mutation.
//!
//! ```no_run
//! use fastpick::{FilePicker, PickerConfig};
//! use std::time::Duration;
//!
//! let picker = FilePicker::new(PickerConfig::new("/path/to/project"))?;
//! picker.wait_for_initial_scan(Duration::from_millis(500));
//!
//! let results = picker.fuzzy_search_files("readme", 10, None, None)?;
//! for (item, score) in results.items.iter().zip(&results.scores) {
//!     println!("{:>5}  {}", score.total, item.relative_path);
//! }
//! # Ok::<(), fastpick::Error>(())
//! ```

pub mod config;
mod error;
pub mod frecency;
pub mod fuzzy;
pub mod git;
pub mod index;
pub mod log;
pub mod path_utils;
pub mod picker;
pub mod score;
pub mod types;
mod watcher;

pub use config::{FrecencyConfig, LogLevel, LoggingConfig, PickerConfig};
pub use error::{Error, Result};
pub use frecency::FrecencyStore;
pub use git::GitTracker;
pub use index::{FileIndex, IgnorePredicate};
pub use log::init_tracing;
pub use picker::{FilePicker, PickerHealth};
pub use types::{
    FileRecord, FsEvent, GitFileStatus, IndexSnapshot, ScanProgress, Score, SearchOutcome,
};
