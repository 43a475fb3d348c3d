//! Path arithmetic for document-relative references.
//!
//! A stored path starting with [`RELATIVE_MARKER`] resolves against the
//! directory of the document that owns it. Everything here is lexical: the
//! filesystem is never consulted, though [`absolute`] reads the working directory.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::error::Error;

/// Prefix marking a stored path as relative to the owning document's directory.
pub const RELATIVE_MARKER: &str = "//";

/// What to do with one stored path when its owning document moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseDecision {
    /// Leave the stored path as written: absolute, or already correct.
    Keep,
    /// Rewrite the stored path to this value.
    Rebase(String),
    /// Leave the stored path alone because its target moves along; carries the reason.
    Skip(String),
}

/// Anchor a path at the working directory if it is relative, then normalize it.
///
/// # Errors
///
/// Returns `Error::Io` if the working directory cannot be determined.
pub fn absolute(path: &Path) -> Result<PathBuf, Error> {
    return Ok(normalize_path(&std::path::absolute(path)?));
}

/// Join path components with the canonical `/` separator.
fn components_to_forward_slashes(path: &Path) -> String {
    return path
        .components()
        .map(|c| return c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
}

/// Decide how a stored path changes when its owner moves from `old_dir` to `new_dir`.
///
/// `co_moved` holds the old absolute paths of every file moving in the same
/// operation. A relative reference into that set keeps its textual form, since
/// owner and target shift together.
pub fn decide_rebase(
    stored: &str,
    old_dir: &Path,
    new_dir: &Path,
    co_moved: &BTreeSet<PathBuf>,
) -> RebaseDecision {
    if !is_relative(stored) {
        return RebaseDecision::Keep;
    }

    let target = resolve(stored, old_dir);
    if co_moved.contains(&target) {
        return RebaseDecision::Skip(format!("{} moves with the document", target.display()));
    }

    let rebased = rebase(stored, old_dir, new_dir);
    if rebased == stored {
        return RebaseDecision::Keep;
    }
    return RebaseDecision::Rebase(rebased);
}

/// Whether a stored path uses the relative marker.
pub fn is_relative(stored: &str) -> bool {
    return stored.starts_with(RELATIVE_MARKER);
}

/// Express an absolute path relative to `owner_dir`, with the relative marker.
/// Falls back to the absolute path when no relative path exists.
pub fn make_relative(absolute: &Path, owner_dir: &Path) -> String {
    return match relative_path(absolute, owner_dir) {
        Some(rel) => format!("{RELATIVE_MARKER}{}", components_to_forward_slashes(&rel)),
        None => normalize_separators(&absolute.to_string_lossy()),
    };
}

/// Collapse `.` and `..` components in a path without touching the filesystem.
/// Preserves leading `..` of a relative path when there is nothing left to pop;
/// `..` at the root of an absolute path is dropped.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        push_normalized_component(&mut components, component);
    }
    return components.iter().collect();
}

/// Replace backslashes with the canonical `/` separator.
pub fn normalize_separators(path: &str) -> String {
    return path.replace('\\', "/");
}

/// Handle a single path component during normalization.
fn push_normalized_component<'a>(components: &mut Vec<Component<'a>>, component: Component<'a>) {
    match component {
        Component::CurDir => {},
        Component::ParentDir => match components.last() {
            Some(Component::Normal(_)) => {
                components.pop();
            },
            Some(Component::Prefix(_) | Component::RootDir) => {},
            Some(Component::CurDir | Component::ParentDir) | None => components.push(component),
        },
        other => components.push(other),
    }
}

/// Recompute a stored path after its owning document moves from `old_dir` to `new_dir`.
///
/// Absolute paths are returned unchanged. So is everything when the directory
/// does not change, and when no relative path from `new_dir` to the target exists.
pub fn rebase(stored: &str, old_dir: &Path, new_dir: &Path) -> String {
    if !is_relative(stored) || old_dir == new_dir {
        return stored.to_string();
    }

    let target = resolve(stored, old_dir);
    return match relative_path(&target, new_dir) {
        Some(rel) => format!("{RELATIVE_MARKER}{}", components_to_forward_slashes(&rel)),
        None => stored.to_string(),
    };
}

/// Lexical relative path from directory `base` to `target`.
/// Returns `None` when the two do not share a root, or when `base` climbs above its own start.
pub fn relative_path(target: &Path, base: &Path) -> Option<PathBuf> {
    let target = normalize_path(target);
    let base = normalize_path(base);
    if target.has_root() != base.has_root() {
        return None;
    }

    let target_parts: Vec<Component<'_>> = target.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(t, b)| return t == b)
        .count();

    if common == 0 && target.has_root() {
        return None;
    }
    if base_parts.iter().skip(common).any(|c| return matches!(c, Component::ParentDir)) {
        return None;
    }

    let mut rel = PathBuf::new();
    for _ in base_parts.iter().skip(common) {
        rel.push("..");
    }
    for part in target_parts.iter().skip(common) {
        rel.push(part.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    return Some(rel);
}

/// Resolve a stored path against the owning document's directory.
/// Absolute stored paths are normalized but otherwise taken as written.
pub fn resolve(stored: &str, owner_dir: &Path) -> PathBuf {
    let Some(rest) = stored.strip_prefix(RELATIVE_MARKER) else {
        return normalize_path(Path::new(stored));
    };
    let rest = normalize_separators(rest);
    return normalize_path(&owner_dir.join(rest.trim_start_matches('/')));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_into_deeper_directory() {
        let rebased = rebase(
            "//../../textures/wood.jpg",
            Path::new("/project/scenes"),
            Path::new("/project/exported/scenes"),
        );
        assert_eq!(rebased, "//../../../textures/wood.jpg");
    }

    #[test]
    fn rebase_single_container_move() {
        let rebased = rebase(
            "//../textures/wood.png",
            Path::new("/p/scenes"),
            Path::new("/p/exported/scenes"),
        );
        assert_eq!(rebased, "//../../textures/wood.png");
    }

    #[test]
    fn rebase_normalizes_backslashes() {
        let rebased = rebase("//..\\tex\\a.png", Path::new("/p/s"), Path::new("/p/s/deep"));
        assert_eq!(rebased, "//../../tex/a.png");
    }

    #[test]
    fn absolute_paths_are_never_rebased() {
        assert_eq!(rebase("/abs/wood.png", Path::new("/a"), Path::new("/b/c")), "/abs/wood.png");
        assert_eq!(
            decide_rebase("/abs/wood.png", Path::new("/a"), Path::new("/b"), &BTreeSet::new()),
            RebaseDecision::Keep
        );
    }

    #[test]
    fn same_directory_is_textual_identity() {
        assert_eq!(rebase("//./x/../y.png", Path::new("/d"), Path::new("/d")), "//./x/../y.png");
    }

    #[test]
    fn co_moved_targets_are_skipped() {
        let co_moved: BTreeSet<PathBuf> = [PathBuf::from("/p/textures/wood.png")].into_iter().collect();
        let decision = decide_rebase(
            "//../textures/wood.png",
            Path::new("/p/scenes"),
            Path::new("/p/exported/scenes"),
            &co_moved,
        );
        assert!(matches!(decision, RebaseDecision::Skip(_)));

        let decision = decide_rebase(
            "//../textures/wood.png",
            Path::new("/p/scenes"),
            Path::new("/p/exported/scenes"),
            &BTreeSet::new(),
        );
        assert_eq!(decision, RebaseDecision::Rebase("//../../textures/wood.png".to_string()));
    }

    #[test]
    fn resolve_is_relative_to_owner() {
        assert_eq!(resolve("//../tex/a.png", Path::new("/p/scenes")), PathBuf::from("/p/tex/a.png"));
        assert_eq!(resolve("//", Path::new("/p/scenes")), PathBuf::from("/p/scenes"));
        assert_eq!(resolve("/abs/./a.png", Path::new("/p")), PathBuf::from("/abs/a.png"));
    }

    #[test]
    fn make_relative_round_trips() {
        let dir = Path::new("/p/scenes/shots");
        let target = Path::new("/p/textures/wood.png");
        let stored = make_relative(target, dir);
        assert_eq!(stored, "//../../textures/wood.png");
        assert_eq!(resolve(&stored, dir), target);
    }

    #[test]
    fn make_relative_of_the_directory_itself() {
        let dir = Path::new("/p/scenes");
        assert_eq!(make_relative(dir, dir), "//.");
        assert_eq!(resolve("//.", dir), dir);
    }

    #[test]
    fn parent_of_root_collapses() {
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("../a/./b/..")), PathBuf::from("../a"));
    }

    #[test]
    fn no_relative_path_between_rooted_and_unrooted() {
        assert!(relative_path(Path::new("/a/b"), Path::new("c/d")).is_none());
        assert!(relative_path(Path::new("a"), Path::new("../b")).is_none());
    }
}
