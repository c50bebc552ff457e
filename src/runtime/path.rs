//! Path utility functions for normalization and comparison.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // At the root (or an empty relative path) the `..` is kept
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => {
                result.push(component);
            }
        }
    }
    result
}

/// Check if a path is under a given directory by comparing normalized path components.
/// `/a/b/../../etc` is NOT under `/a`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let normalized_path = normalize_path(path);
    let normalized_dir = normalize_path(dir);

    let path_components: Vec<_> = normalized_path.components().collect();
    let dir_components: Vec<_> = normalized_dir.components().collect();

    if path_components.len() < dir_components.len() {
        return false;
    }

    dir_components
        .iter()
        .zip(path_components.iter())
        .all(|(d, p)| d == p)
}

/// Number of components `path` sits below `root`, or `None` when it is not under it.
///
/// `depth_under("/r", "/r/pkg/resources") == Some(2)`.
pub fn depth_under(root: &Path, path: &Path) -> Option<usize> {
    if !is_path_under(path, root) {
        return None;
    }
    let root_len = normalize_path(root).components().count();
    Some(normalize_path(path).components().count() - root_len)
}

/// True for a non-empty relative path made only of plain names (no `.`, `..` or root).
pub fn is_plain_relative(path: &str) -> bool {
    !path.trim().is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

/// Expand a leading `~` against `home`. Other paths are returned unchanged.
pub fn expand_tilde(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') || rest.starts_with('\\') => {
            home.join(&rest[1..])
        }
        _ => PathBuf::from(path),
    }
}
