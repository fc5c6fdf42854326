//! Path helpers shared by the index and the scorer.

use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonicalize a path, resolving symlinks and producing an absolute path.
///
/// On Windows, uses `dunce::canonicalize` to avoid the `\\?\` extended-length
/// path prefix that `std::fs::canonicalize` produces, which most host editors
/// cannot open. On other platforms, delegates to `std::fs::canonicalize`.
#[cfg(windows)]
pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    dunce::canonicalize(path)
}

#[cfg(not(windows))]
pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

/// Path of `path` relative to `base`, lossily rendered as a string.
/// Falls back to the absolute path when `path` is not under `base`.
pub fn relative_to(base: &Path, path: &Path) -> String {
    pathdiff::diff_paths(path, base)
        .unwrap_or_else(|| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// The default hidden-entry predicate: rejects any path with a leading-dot
/// component (which also covers `.git`). Hosts can replace it at init.
pub fn is_hidden_path(path: &Path) -> bool {
    path.components().any(|component| {
        if let Component::Normal(name) = component
            && let Some(name) = name.to_str()
        {
            name.starts_with('.')
        } else {
            false
        }
    })
}

/// How many points of current-directory bias a sibling of the focused file
/// earns.
pub const SAME_DIR_BONUS: i32 = 12;

const MAX_DISTANCE_PENALTY: i32 = -20;

/// Directory proximity between the focused file and a candidate.
///
/// Same directory earns [`SAME_DIR_BONUS`]; otherwise the result is a
/// non-positive penalty of one point per directory the focused file sits
/// below the common ancestor, capped at [`MAX_DISTANCE_PENALTY`].
pub fn directory_proximity(current_file: Option<&str>, candidate_path: &str) -> i32 {
    let Some(current_path) = current_file else {
        return 0;
    };

    let current_dir = Path::new(current_path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let candidate_dir = Path::new(candidate_path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    if current_dir == candidate_dir {
        return SAME_DIR_BONUS;
    }

    let current_parts: Vec<&str> = current_dir
        .split(std::path::MAIN_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();
    let candidate_parts: Vec<&str> = candidate_dir
        .split(std::path::MAIN_SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();

    let common_len = current_parts
        .iter()
        .zip(candidate_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let current_depth_from_common = current_parts.len() - common_len;
    if current_depth_from_common == 0 {
        return 0;
    }

    (-(current_depth_from_common as i32)).max(MAX_DISTANCE_PENALTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_predicate_rejects_dot_components() {
        assert!(is_hidden_path(Path::new(".gitignore")));
        assert!(is_hidden_path(Path::new(".git/config")));
        assert!(is_hidden_path(Path::new("src/.cache/entry")));
        assert!(!is_hidden_path(Path::new("src/main.rs")));
        assert!(!is_hidden_path(Path::new("docs/readme.md")));
    }

    #[test]
    #[cfg(not(target_family = "windows"))]
    fn proximity_rewards_siblings_and_penalizes_distance() {
        assert_eq!(directory_proximity(None, "src/mod.rs"), 0);
        assert_eq!(
            directory_proximity(Some("src/main.rs"), "src/mod.rs"),
            SAME_DIR_BONUS
        );
        // candidate sits above the focused file
        assert_eq!(
            directory_proximity(Some("src/server/handlers/file.rs"), "src/mod.rs"),
            -2
        );
        // sibling subtrees one level apart
        assert_eq!(
            directory_proximity(Some("src/dir1/file.rs"), "src/dir2/mod.rs"),
            -1
        );
        // completely disjoint trees
        assert_eq!(
            directory_proximity(Some("services/audio/src/lib.rs"), "tools/pixel/main.rs"),
            -3
        );
        // root level files share the empty directory
        assert_eq!(
            directory_proximity(Some("main.rs"), "lib.rs"),
            SAME_DIR_BONUS
        );
    }

    #[test]
    fn relative_to_falls_back_to_absolute() {
        let rel = relative_to(Path::new("/repo"), Path::new("/repo/src/main.rs"));
        assert_eq!(rel, "src/main.rs");

        let outside = relative_to(Path::new("/repo"), Path::new("/other/file.rs"));
        assert!(!outside.is_empty());
    }
}
