//! Typo-resistant fuzzy matching over relative paths.
//!
//! The matcher returns both an integer score and the byte positions that
//! participated in the match, so the UI can highlight them and tests can
//! verify the witness. Scoring is a subsequence dynamic program with
//! bonuses for contiguous runs, path-segment starts, word boundaries,
//! camelCase transitions and case-exact hits; typo tolerance is layered on
//! top by retrying a bounded set of edited needles (adjacent
//! transpositions, one or two deletions) at a fixed penalty.
//!
//! Everything is integer arithmetic; identical inputs always produce
//! identical scores and positions.

use crate::types::MatchPositions;
use smallvec::SmallVec;

pub const SCORE_MATCH: i32 = 16;
pub const BONUS_CONSECUTIVE: i32 = 12;
pub const BONUS_SEGMENT_START: i32 = 14;
pub const BONUS_WORD_BOUNDARY: i32 = 10;
pub const BONUS_CAMEL: i32 = 8;
pub const BONUS_PREFIX: i32 = 10;
pub const BONUS_CASE_MATCH: i32 = 4;
pub const PENALTY_GAP: i32 = -1;
pub const PENALTY_TYPO: i32 = -40;
pub const BONUS_PIECE_ANCHOR: i32 = 20;

pub const DEFAULT_MIN_SCORE: i32 = 24;

const MAX_NEEDLE_LEN: usize = 64;
const MAX_HAYSTACK_LEN: usize = 1024;
const NONE_SCORE: i32 = i32::MIN / 2;

/// A successful match: score, whether the needle equals the whole haystack,
/// and the strictly increasing byte offsets that matched.
#[derive(Debug, Clone)]
pub struct FuzzyMatch {
    pub score: i32,
    pub exact: bool,
    pub positions: MatchPositions,
}

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Needle edits tolerated before giving up on a candidate.
    pub max_typos: u16,
    /// Matches scoring below this are reported as no match at all.
    pub min_score: i32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            max_typos: 2,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl MatchOptions {
    /// Typo budget scaled to the query length: very short needles cannot
    /// absorb two edits without matching everything.
    pub fn for_query(query: &str) -> Self {
        let max_typos = if query.len() < 4 { 1 } else { 2 };
        Self {
            max_typos,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

/// Match `needle` against a relative path.
///
/// A `/` in the needle switches to piecewise mode: pieces are matched
/// right-to-left, each within a single path segment.
pub fn match_path(needle: &str, haystack: &str, options: &MatchOptions) -> Option<FuzzyMatch> {
    let needle = needle.trim();
    if needle.is_empty() || haystack.is_empty() {
        return None;
    }
    if needle.contains('/') {
        return match_piecewise(needle, haystack, options);
    }

    let mut m = match_with_typos(needle.as_bytes(), haystack.as_bytes(), options)?;
    m.exact = needle.eq_ignore_ascii_case(haystack);
    if m.score < options.min_score {
        return None;
    }
    Some(m)
}

/// Piecewise mode: `b/foo` must find a segment matching `foo` and, strictly
/// to its left, a segment matching `b`. Per-piece scores are summed and each
/// anchored piece earns a boundary bonus.
fn match_piecewise(needle: &str, haystack: &str, options: &MatchOptions) -> Option<FuzzyMatch> {
    let pieces: Vec<&str> = needle.split('/').filter(|p| !p.is_empty()).collect();
    if pieces.is_empty() {
        return None;
    }

    let hay = haystack.as_bytes();
    let segments = split_segments(hay);
    let mut cursor = segments.len();
    let mut total = 0i32;
    let mut per_piece: Vec<MatchPositions> = Vec::with_capacity(pieces.len());

    for piece in pieces.iter().rev() {
        let mut found = None;
        for seg_idx in (0..cursor).rev() {
            let (start, end) = segments[seg_idx];
            if let Some(m) = match_with_typos(piece.as_bytes(), &hay[start..end], options) {
                found = Some((seg_idx, start, m));
                break;
            }
        }

        let (seg_idx, seg_start, m) = found?;
        total = total.saturating_add(m.score).saturating_add(BONUS_PIECE_ANCHOR);
        per_piece.push(
            m.positions
                .iter()
                .map(|p| p + seg_start as u32)
                .collect(),
        );
        cursor = seg_idx;
    }

    if total < options.min_score {
        return None;
    }

    // pieces were consumed right-to-left; reassemble in increasing order
    let mut positions = MatchPositions::new();
    for piece_positions in per_piece.into_iter().rev() {
        positions.extend(piece_positions);
    }

    Some(FuzzyMatch {
        score: total,
        exact: needle.eq_ignore_ascii_case(haystack),
        positions,
    })
}

fn split_segments(hay: &[u8]) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (idx, &b) in hay.iter().enumerate() {
        if b == b'/' {
            if idx > start {
                segments.push((start, idx));
            }
            start = idx + 1;
        }
    }
    if hay.len() > start {
        segments.push((start, hay.len()));
    }
    segments
}

/// Try the unedited needle first; when it is not a clean subsequence, retry
/// bounded edited variants behind a cheap character-set prefilter.
fn match_with_typos(needle: &[u8], hay: &[u8], options: &MatchOptions) -> Option<FuzzyMatch> {
    if needle.is_empty() || needle.len() > MAX_NEEDLE_LEN || hay.len() > MAX_HAYSTACK_LEN {
        return None;
    }

    if is_subsequence(needle, hay) {
        return dp_match(needle, hay, 0);
    }
    if options.max_typos == 0 {
        return None;
    }

    // No variant can recover more characters than the typo budget deletes.
    if missing_char_count(needle, hay) > options.max_typos as usize {
        return None;
    }

    let mut best: Option<FuzzyMatch> = None;
    for (variant, typos) in needle_variants(needle, options.max_typos) {
        if !is_subsequence(&variant, hay) {
            continue;
        }
        if let Some(m) = dp_match(&variant, hay, typos)
            && best.as_ref().is_none_or(|b| m.score > b.score)
        {
            best = Some(m);
        }
    }

    best
}

type NeedleBuf = SmallVec<[u8; 32]>;

fn needle_variants(needle: &[u8], max_typos: u16) -> Vec<(NeedleBuf, u16)> {
    let n = needle.len();
    let mut variants: Vec<(NeedleBuf, u16)> = Vec::new();

    // adjacent transpositions: "cofnig" -> "config"
    for i in 0..n.saturating_sub(1) {
        if needle[i] != needle[i + 1] {
            let mut v: NeedleBuf = SmallVec::from_slice(needle);
            v.swap(i, i + 1);
            variants.push((v, 1));
        }
    }

    // single deletions, keeping at least two characters
    if n >= 3 {
        for i in 0..n {
            let mut v: NeedleBuf = SmallVec::with_capacity(n - 1);
            v.extend_from_slice(&needle[..i]);
            v.extend_from_slice(&needle[i + 1..]);
            variants.push((v, 1));
        }
    }

    // double deletions only for needles long enough to stay selective
    if max_typos >= 2 && n >= 5 {
        for i in 0..n {
            for j in (i + 1)..n {
                let mut v: NeedleBuf = SmallVec::with_capacity(n - 2);
                for (idx, &b) in needle.iter().enumerate() {
                    if idx != i && idx != j {
                        v.push(b);
                    }
                }
                variants.push((v, 2));
            }
        }
    }

    variants
}

#[inline]
fn bytes_match(needle: u8, hay: u8) -> bool {
    needle.eq_ignore_ascii_case(&hay)
}

/// Greedy case-insensitive subsequence test, the cheap prefilter in front
/// of the dynamic program.
fn is_subsequence(needle: &[u8], hay: &[u8]) -> bool {
    let mut iter = hay.iter();
    needle
        .iter()
        .all(|&n| iter.by_ref().any(|&h| bytes_match(n, h)))
}

/// How many needle characters do not occur in the haystack at all.
fn missing_char_count(needle: &[u8], hay: &[u8]) -> usize {
    let mut present = [false; 256];
    for &b in hay {
        present[b.to_ascii_lowercase() as usize] = true;
    }
    needle
        .iter()
        .filter(|b| !present[b.to_ascii_lowercase() as usize])
        .count()
}

#[inline]
fn boundary_bonus(hay: &[u8], j: usize) -> i32 {
    if j == 0 {
        return BONUS_SEGMENT_START + BONUS_PREFIX;
    }
    let prev = hay[j - 1];
    if prev == b'/' {
        BONUS_SEGMENT_START
    } else if matches!(prev, b'_' | b'-' | b'.' | b' ') {
        BONUS_WORD_BOUNDARY
    } else if prev.is_ascii_lowercase() && hay[j].is_ascii_uppercase() {
        BONUS_CAMEL
    } else {
        0
    }
}

/// Optimal subsequence alignment with position traceback.
///
/// `M[i][j]` is the best score with needle byte `i` matched at haystack
/// byte `j`. Consecutive matches earn [`BONUS_CONSECUTIVE`]; skipped
/// haystack bytes between matches cost [`PENALTY_GAP`] each, tracked with a
/// running prefix maximum so the whole table fills in O(n·m).
fn dp_match(needle: &[u8], hay: &[u8], typos: u16) -> Option<FuzzyMatch> {
    let n = needle.len();
    let m = hay.len();
    if n == 0 || m == 0 || n > m {
        return None;
    }

    let has_upper = needle.iter().any(|b| b.is_ascii_uppercase());

    let mut scores = vec![NONE_SCORE; n * m];
    let mut preds = vec![u32::MAX; n * m];

    // First row: each possible anchor for the first needle byte.
    for j in 0..m {
        if bytes_match(needle[0], hay[j]) {
            let case = if has_upper && needle[0].is_ascii_uppercase() && needle[0] == hay[j] {
                BONUS_CASE_MATCH
            } else {
                0
            };
            scores[j] = SCORE_MATCH + boundary_bonus(hay, j) + case;
        }
    }

    for i in 1..n {
        let prev_row = (i - 1) * m;
        let row = i * m;

        // Running max of M[i-1][j'] + j' (gap candidates), with its argmax.
        let mut best_gap = NONE_SCORE;
        let mut best_gap_at = u32::MAX;

        for j in 0..m {
            if j > 0 {
                let prev = scores[prev_row + j - 1];
                if prev > NONE_SCORE {
                    let keyed = prev + (j as i32 - 1);
                    if keyed > best_gap {
                        best_gap = keyed;
                        best_gap_at = (j - 1) as u32;
                    }
                }
            }

            if !bytes_match(needle[i], hay[j]) {
                continue;
            }

            let consecutive = if j > 0 && scores[prev_row + j - 1] > NONE_SCORE {
                scores[prev_row + j - 1] + BONUS_CONSECUTIVE
            } else {
                NONE_SCORE
            };
            // candidate = M[i-1][j'] + PENALTY_GAP·(j - j' - 1) for the best
            // j' < j; best_gap already carries the +j' term
            let gapped = if best_gap > NONE_SCORE {
                best_gap + (j as i32 - 1) * PENALTY_GAP
            } else {
                NONE_SCORE
            };

            let (base, pred) = if consecutive >= gapped {
                (consecutive, (j - 1) as u32)
            } else {
                (gapped, best_gap_at)
            };
            if base <= NONE_SCORE {
                continue;
            }

            let case = if has_upper && needle[i].is_ascii_uppercase() && needle[i] == hay[j] {
                BONUS_CASE_MATCH
            } else {
                0
            };
            scores[row + j] = base + SCORE_MATCH + boundary_bonus(hay, j) + case;
            preds[row + j] = pred;
        }
    }

    let last_row = (n - 1) * m;
    let (best_j, best_score) = (0..m)
        .map(|j| (j, scores[last_row + j]))
        .max_by_key(|&(j, score)| (score, std::cmp::Reverse(j)))?;
    if best_score <= NONE_SCORE {
        return None;
    }

    let mut positions = MatchPositions::new();
    let mut j = best_j;
    for i in (0..n).rev() {
        positions.push(j as u32);
        if i > 0 {
            j = preds[i * m + j] as usize;
        }
    }
    positions.reverse();

    Some(FuzzyMatch {
        score: best_score + PENALTY_TYPO * typos as i32,
        exact: false,
        positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_match(needle: &str, haystack: &str) -> FuzzyMatch {
        match_path(needle, haystack, &MatchOptions::for_query(needle))
            .unwrap_or_else(|| panic!("'{needle}' should match '{haystack}'"))
    }

    fn assert_witness(m: &FuzzyMatch, haystack: &str) {
        assert!(!m.positions.is_empty());
        let mut prev: Option<u32> = None;
        for &p in &m.positions {
            assert!((p as usize) < haystack.len(), "position {p} out of bounds");
            if let Some(prev) = prev {
                assert!(p > prev, "positions must be strictly increasing");
            }
            prev = Some(p);
        }
    }

    #[test]
    fn clean_subsequence_matches_with_witness() {
        let m = must_match("main", "src/main.rs");
        assert_witness(&m, "src/main.rs");
        assert_eq!(m.positions.as_slice(), &[4, 5, 6, 7]);
        assert!(!m.exact);
    }

    #[test]
    fn no_match_when_characters_absent() {
        assert!(match_path("xyz", "src/main.rs", &MatchOptions::default()).is_none());
    }

    #[test]
    fn exact_haystack_sets_exact_flag() {
        let m = must_match("src/main.rs", "src/main.rs");
        assert!(m.exact);

        let m = must_match("README.md", "readme.md");
        assert!(m.exact);
    }

    #[test]
    fn prefix_and_run_beat_scattered_match() {
        let srcfile = must_match("sr", "src/srcfile.rs");
        let sorcery = must_match("sr", "sensors/sorcery.rs");
        assert!(
            srcfile.score > sorcery.score,
            "contiguous prefix run should outrank the scattered match: {} vs {}",
            srcfile.score,
            sorcery.score
        );
    }

    #[test]
    fn segment_start_beats_mid_word() {
        let anchored = must_match("conf", "src/config.rs");
        let buried = must_match("conf", "src/preconfig.rs");
        assert!(anchored.score > buried.score);
    }

    #[test]
    fn camel_case_boundary_is_rewarded() {
        let camel = must_match("fb", "src/FooBar.rs");
        // positions land on the two capitals
        assert_eq!(camel.positions.as_slice(), &[4, 7]);
    }

    #[test]
    fn case_exact_match_scores_higher_when_query_has_uppercase() {
        let exact_case = must_match("FooBar", "src/FooBar.rs");
        let folded = must_match("FooBar", "src/foobar.rs");
        assert!(exact_case.score > folded.score);
    }

    #[test]
    fn transposition_is_tolerated_with_penalty() {
        let typo = must_match("cofnig", "src/config.rs");
        assert_witness(&typo, "src/config.rs");

        let clean = must_match("config", "src/config.rs");
        assert!(clean.score > typo.score, "typo must cost something");
    }

    #[test]
    fn transposed_query_prefers_the_intended_file() {
        let options = MatchOptions::for_query("cofnig");
        let config = match_path("cofnig", "src/config.rs", &options);
        let conflict = match_path("cofnig", "src/conflict.rs", &options);

        let config = config.expect("cofnig should match config.rs");
        if let Some(conflict) = conflict {
            assert!(config.score > conflict.score);
        }
    }

    #[test]
    fn single_extra_character_is_tolerated() {
        // one inserted character: a single deletion variant recovers it
        let m = must_match("maixn", "src/main.rs");
        assert_witness(&m, "src/main.rs");
    }

    #[test]
    fn typo_budget_zero_rejects_edits() {
        let options = MatchOptions {
            max_typos: 0,
            min_score: 0,
        };
        assert!(match_path("cofnig", "src/config.rs", &options).is_none());
    }

    #[test]
    fn piecewise_requires_pieces_in_segment_order() {
        let options = MatchOptions::for_query("b/foo");
        let nested = match_path("b/foo", "a/b/foo.rs", &options).expect("b/foo should match");
        assert_witness(&nested, "a/b/foo.rs");
        assert!(nested.positions.as_slice().contains(&2));

        assert!(
            match_path("b/foo", "x/foo.rs", &options).is_none(),
            "no segment to the left matches 'b'"
        );
    }

    #[test]
    fn piecewise_pieces_stay_within_one_segment() {
        let options = MatchOptions::for_query("ab/c");
        // 'ab' spans two segments here, so the piece must not match
        assert!(match_path("ab/c", "a/b/c.rs", &options).is_none());
    }

    #[test]
    fn cutoff_reports_weak_matches_as_none() {
        let strict = MatchOptions {
            max_typos: 2,
            min_score: 200,
        };
        assert!(match_path("cg", "src/config.rs", &strict).is_none());
    }

    #[test]
    fn positions_witness_survives_typo_variants() {
        let m = must_match("sproket", "src/sprocket.rs");
        assert_witness(&m, "src/sprocket.rs");
    }
}
