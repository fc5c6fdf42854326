//! Ranking: composes fuzzy score, path heuristics, frecency, git status and
//! current-file bias into a single integer total and selects the top-K
//! through a bounded min-heap.

use crate::error::{Error, Result};
use crate::frecency;
use crate::fuzzy::{self, MatchOptions};
use crate::path_utils::directory_proximity;
use crate::types::{FileRecord, MatchPositions, Score, ScoringContext};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

/// Flat demotion applied to the currently focused file on top of its own
/// subtotal, so it sinks even when every other component is zero.
const CURRENT_FILE_PENALTY: i32 = 1000;
/// Bias for candidates living directly in the caller's cwd.
const CWD_BONUS: i32 = 8;
/// Bonus when the query ends with the candidate's extension.
const EXTENSION_BONUS: i32 = 15;
/// Per-directory depth penalty.
const DEPTH_PENALTY: i32 = -2;
/// Cap on the proportional filename-overlap bonus.
const FILENAME_BONUS_CAP: i32 = 30;
/// Scale applied to the frecency score before composition.
const FRECENCY_WEIGHT: i32 = 2;

/// Records are scored in batches; the cancellation flag is observed at each
/// batch boundary.
const BATCH_SIZE: usize = 1024;

struct Candidate {
    total: i32,
    /// mtime, used as the leading tie-break only for recency-mode queries.
    recency: u64,
    fuzzy: i32,
    record: Arc<FileRecord>,
    score: Score,
}

impl Candidate {
    fn ord_key(&self) -> (i32, u64, i32) {
        (self.total, self.recency, self.fuzzy)
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Greater is better: total, fuzzy, then shorter relative path,
    /// lexicographically smaller path, lower id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.ord_key()
            .cmp(&other.ord_key())
            .then_with(|| {
                other
                    .record
                    .relative_path
                    .len()
                    .cmp(&self.record.relative_path.len())
            })
            .then_with(|| other.record.relative_path.cmp(&self.record.relative_path))
            .then_with(|| other.record.id.cmp(&self.record.id))
    }
}

/// Bounded top-K collector: a min-heap of at most `cap` candidates.
struct TopK {
    cap: usize,
    heap: BinaryHeap<Reverse<Candidate>>,
}

impl TopK {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            heap: BinaryHeap::with_capacity(cap.min(1024) + 1),
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if self.cap == 0 {
            return;
        }
        if self.heap.len() < self.cap {
            self.heap.push(Reverse(candidate));
        } else if let Some(mut min) = self.heap.peek_mut()
            && candidate > min.0
        {
            *min = Reverse(candidate);
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for Reverse(candidate) in other.heap {
            self.push(candidate);
        }
        self
    }

    fn into_sorted(self) -> Vec<Candidate> {
        // ascending order of Reverse<_> is descending order of Candidate
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(c)| c)
            .collect()
    }
}

/// Rank every record in the snapshot against the context and return the
/// best `max_results` candidates plus the total match count.
pub fn rank(
    records: &[Arc<FileRecord>],
    context: &ScoringContext<'_>,
) -> Result<(Vec<(Arc<FileRecord>, Score)>, usize)> {
    let query = context.query.trim();

    // Sub-2-byte queries cannot be ranked by match quality; surface the
    // frecency ordering instead.
    if query.len() < 2 {
        return rank_by_recency(records, context);
    }

    let options = MatchOptions {
        min_score: context.min_score,
        ..MatchOptions::for_query(query)
    };
    let query_info = QueryInfo::parse(query);
    let matched = AtomicUsize::new(0);

    let top = records
        .par_chunks(BATCH_SIZE)
        .map(|chunk| -> Result<TopK> {
            if context.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut top = TopK::new(context.max_results);
            let mut found = 0usize;
            for record in chunk {
                if let Some(candidate) = score_record(record, query, &query_info, &options, context)
                {
                    found += 1;
                    top.push(candidate);
                }
            }
            matched.fetch_add(found, std::sync::atomic::Ordering::Relaxed);
            Ok(top)
        })
        .try_reduce(
            || TopK::new(context.max_results),
            |a, b| Ok(a.merge(b)),
        )?;

    if context.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let hits = top
        .into_sorted()
        .into_iter()
        .map(|c| (c.record, c.score))
        .collect();
    Ok((hits, matched.load(std::sync::atomic::Ordering::Relaxed)))
}

struct QueryInfo {
    contains_separator: bool,
    /// `Some("rs")` when the query ends in `.rs`.
    extension: Option<String>,
}

impl QueryInfo {
    fn parse(query: &str) -> Self {
        let extension = query
            .rsplit_once('.')
            .map(|(stem, ext)| (stem, ext.to_lowercase()))
            .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty() && !ext.contains('/'))
            .map(|(_, ext)| ext);

        Self {
            contains_separator: query.contains('/'),
            extension,
        }
    }
}

fn score_record(
    record: &Arc<FileRecord>,
    query: &str,
    query_info: &QueryInfo,
    options: &MatchOptions,
    context: &ScoringContext<'_>,
) -> Option<Candidate> {
    let matched = fuzzy::match_path(query, &record.relative_path, options)?;
    let fuzzy_score = matched.score;

    let path_bonus = path_bonus(
        record,
        query,
        query_info,
        &matched.positions,
        matched.exact,
        fuzzy_score,
    );
    let frecency_bonus = frecency_bonus(record);
    let git_bonus = git_bonus(record, context);
    let current_file_bonus =
        current_file_bonus(record, fuzzy_score.saturating_add(path_bonus), context);

    let total = fuzzy_score
        .saturating_add(path_bonus)
        .saturating_add(frecency_bonus)
        .saturating_add(git_bonus)
        .saturating_add(current_file_bonus);

    let match_kind = if matched.exact {
        "exact_path"
    } else if is_exact_filename(record, query) {
        "exact_filename"
    } else if overlaps_filename(record, &matched.positions) {
        "fuzzy_filename"
    } else {
        "fuzzy_path"
    };

    let score = Score {
        total,
        fuzzy: fuzzy_score,
        path_bonus,
        frecency_bonus,
        git_bonus,
        current_file_bonus,
        exact: matched.exact,
        match_kind,
        positions: matched.positions,
    };

    Some(Candidate {
        total,
        recency: 0,
        fuzzy: fuzzy_score,
        record: Arc::clone(record),
        score,
    })
}

/// Empty-query ordering: frecency, git state and proximity decide, and ties
/// fall to the most recently modified file.
fn rank_by_recency(
    records: &[Arc<FileRecord>],
    context: &ScoringContext<'_>,
) -> Result<(Vec<(Arc<FileRecord>, Score)>, usize)> {
    let total = records.len();

    let top = records
        .par_chunks(BATCH_SIZE)
        .map(|chunk| -> Result<TopK> {
            if context.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut top = TopK::new(context.max_results);
            for record in chunk {
                let frecency_bonus = frecency_bonus(record);
                let git_bonus = git_bonus(record, context);
                let subtotal = frecency_bonus.saturating_add(git_bonus);
                let current_file_bonus = current_file_bonus(record, subtotal.max(0), context);
                let total_score = subtotal.saturating_add(current_file_bonus);

                top.push(Candidate {
                    total: total_score,
                    recency: record.modified(),
                    fuzzy: 0,
                    record: Arc::clone(record),
                    score: Score {
                        total: total_score,
                        fuzzy: 0,
                        path_bonus: 0,
                        frecency_bonus,
                        git_bonus,
                        current_file_bonus,
                        exact: false,
                        match_kind: "frecency",
                        positions: SmallVec::new(),
                    },
                });
            }
            Ok(top)
        })
        .try_reduce(
            || TopK::new(context.max_results),
            |a, b| Ok(a.merge(b)),
        )?;

    if context.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let hits = top
        .into_sorted()
        .into_iter()
        .map(|c| (c.record, c.score))
        .collect();
    Ok((hits, total))
}

fn is_exact_filename(record: &FileRecord, query: &str) -> bool {
    query.eq_ignore_ascii_case(&record.name)
}

fn overlaps_filename(record: &FileRecord, positions: &MatchPositions) -> bool {
    let name_start = record.name_start() as u32;
    positions.iter().any(|&p| p >= name_start)
}

fn path_bonus(
    record: &FileRecord,
    query: &str,
    query_info: &QueryInfo,
    positions: &MatchPositions,
    exact: bool,
    fuzzy_score: i32,
) -> i32 {
    let depth = record.relative_path.matches('/').count() as i32;
    let mut bonus = depth * DEPTH_PENALTY;

    let filename_overlap = !query_info.contains_separator && overlaps_filename(record, positions);
    if exact || (filename_overlap && is_exact_filename(record, query)) {
        // exact hit on the whole path or the bare file name
        bonus += fuzzy_score / 5 * 2;
    } else if filename_overlap {
        bonus += (fuzzy_score / 6).min(FILENAME_BONUS_CAP);
    } else if is_special_entry_point_file(&record.name) {
        // small nudge for module entry points so `server` still surfaces
        // `server/mod.rs` next to `server.rs`
        bonus += fuzzy_score * 5 / 100;
    }

    if let Some(ext) = &query_info.extension
        && !record.extension.is_empty()
        && *ext == record.extension
    {
        bonus += EXTENSION_BONUS;
    }

    bonus
}

/// Entry-point files that deserve a nudge: they name their directory, not
/// themselves.
fn is_special_entry_point_file(filename: &str) -> bool {
    matches!(
        filename,
        "mod.rs"
            | "lib.rs"
            | "main.rs"
            | "index.js"
            | "index.jsx"
            | "index.ts"
            | "index.tsx"
            | "index.mjs"
            | "index.cjs"
            | "index.vue"
            | "__init__.py"
            | "__main__.py"
            | "main.go"
            | "main.c"
            | "index.php"
            | "main.rb"
            | "index.rb"
    )
}

fn frecency_bonus(record: &FileRecord) -> i32 {
    let score = record.frecency_score().clamp(0, i32::MAX as i64) as i32;
    score.saturating_mul(FRECENCY_WEIGHT)
}

fn git_bonus(record: &FileRecord, context: &ScoringContext<'_>) -> i32 {
    let status = record.git_status();
    let mut bonus = status.rank_bonus();
    if context.in_worktree {
        bonus += frecency::modification_recency(record.modified(), context.now);
    }
    bonus
}

/// Large negative value for the focused file itself (softened when the file
/// carries uncommitted work), moderate positive bias for its siblings and
/// for files directly in the caller's cwd.
fn current_file_bonus(record: &FileRecord, subtotal: i32, context: &ScoringContext<'_>) -> i32 {
    if let Some(current) = context.current_file
        && is_current_file(record, current)
    {
        let demotion = subtotal.max(0).saturating_add(CURRENT_FILE_PENALTY);
        return if record.git_status().is_dirty() {
            -(demotion / 2)
        } else {
            -demotion
        };
    }

    let mut bonus = directory_proximity(context.current_file, &record.relative_path);
    if let Some(cwd) = context.cwd
        && record.path.parent() == Some(cwd)
    {
        bonus += CWD_BONUS;
    }
    bonus
}

fn is_current_file(record: &FileRecord, current: &str) -> bool {
    record.relative_path == current || record.path.as_os_str() == current
}
