//! Project traversal: enumerate documents, assets and backups under a root.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::types::DocumentKind;

/// Directory names pruned in every project, whatever the config says.
pub const ALWAYS_IGNORED: &[&str] = &[".git", ".svn", ".hg", ".idea", ".vscode", "__pycache__"];

/// Directory names pruned when the project config does not list its own.
pub const DEFAULT_IGNORED: &[&str] = &[
    ".venv",
    "venv",
    ".pytest_cache",
    "node_modules",
    "build",
    "dist",
    "*.egg-info",
];

/// Outcome of deleting editor backups.
#[derive(Debug, Default, Clone)]
pub struct BackupCleanup {
    /// Total size of the removed files.
    pub bytes_freed: u64,
    /// Backups that could not be removed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
    /// Backups removed, sorted.
    pub removed: Vec<PathBuf>,
}

/// What a file is, as far as reference tracking cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A referenceable asset such as an image.
    Asset,
    /// An editor backup of a document (`.blend1`, `.blend2`).
    Backup,
    /// A container document that owns references.
    Document,
    /// Anything else.
    Other,
}

/// Documents and assets found under a project root, each list sorted.
#[derive(Debug, Default, Clone)]
pub struct ProjectInventory {
    /// Asset files matching the configured asset extensions.
    pub assets: Vec<PathBuf>,
    /// Container documents.
    pub documents: Vec<PathBuf>,
}

/// Traversal rules: which directories are pruned and which extensions mean what.
/// Extensions are stored lowercase without the leading dot.
#[derive(Debug, Clone)]
pub struct ScanRules {
    /// Extensions of referenceable assets.
    pub asset_extensions: Vec<String>,
    /// Extensions of editor backup files.
    pub backup_extensions: Vec<String>,
    /// Extensions of container documents.
    pub document_extensions: Vec<String>,
    /// Skip dot-prefixed files. Dot-prefixed directories are always pruned.
    ignore_hidden_files: bool,
    /// Exact directory names to prune.
    ignored_names: BTreeSet<String>,
    /// Wildcard directory patterns to prune, anchored at both ends.
    ignored_patterns: Vec<Regex>,
}

impl Default for ScanRules {
    fn default() -> Self {
        let ignore: Vec<String> = ALWAYS_IGNORED
            .iter()
            .chain(DEFAULT_IGNORED)
            .map(|s| return (*s).to_string())
            .collect();
        return Self::new(
            &ignore,
            true,
            vec!["blend".to_string()],
            ["png", "jpg", "jpeg", "exr", "hdr", "tif", "tiff"].iter().map(|s| return (*s).to_string()).collect(),
            vec!["blend1".to_string(), "blend2".to_string()],
        );
    }
}

impl ScanRules {
    /// Classify a path by its extension.
    pub fn classify(&self, path: &Path) -> FileKind {
        if has_extension_in(path, &self.document_extensions) {
            return FileKind::Document;
        }
        if has_extension_in(path, &self.asset_extensions) {
            return FileKind::Asset;
        }
        if has_extension_in(path, &self.backup_extensions) {
            return FileKind::Backup;
        }
        return FileKind::Other;
    }

    /// Containers own relative references and get rebased when they move; everything else is a leaf.
    pub fn document_kind(&self, path: &Path) -> DocumentKind {
        return match self.classify(path) {
            FileKind::Document => DocumentKind::Container,
            FileKind::Asset | FileKind::Backup | FileKind::Other => DocumentKind::LeafAsset,
        };
    }

    /// Whether a directory with this name is pruned before descending.
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        return name.starts_with('.')
            || self.ignored_names.contains(name)
            || self.ignored_patterns.iter().any(|p| return p.is_match(name));
    }

    /// Build rules from ignore entries and extension lists.
    /// An ignore entry containing `*` is a wildcard over the whole directory name.
    pub fn new(
        ignore: &[String],
        ignore_hidden_files: bool,
        document_extensions: Vec<String>,
        asset_extensions: Vec<String>,
        backup_extensions: Vec<String>,
    ) -> Self {
        let mut ignored_names = BTreeSet::new();
        let mut ignored_patterns = Vec::new();
        for entry in ignore {
            if entry.contains('*') {
                if let Some(pattern) = wildcard_to_regex(entry) {
                    ignored_patterns.push(pattern);
                }
            } else {
                ignored_names.insert(entry.clone());
            }
        }

        return Self {
            asset_extensions: normalize_extensions(asset_extensions),
            backup_extensions: normalize_extensions(backup_extensions),
            document_extensions: normalize_extensions(document_extensions),
            ignore_hidden_files,
            ignored_names,
            ignored_patterns,
        };
    }

    /// Whether a walk entry should be visited. Returning false for a directory prunes its subtree.
    fn should_visit(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            return !self.is_ignored_dir(&name);
        }
        return !(self.ignore_hidden_files && name.starts_with('.'));
    }
}

/// Delete every editor backup under `root`. A file that cannot be removed is
/// recorded and the rest are still attempted.
pub fn clean_backups(root: &Path, rules: &ScanRules) -> BackupCleanup {
    let mut cleanup = BackupCleanup::default();
    for backup in find_backups(root, rules) {
        let size = fs::metadata(&backup).map_or(0, |m| return m.len());
        match fs::remove_file(&backup) {
            Ok(()) => {
                cleanup.bytes_freed = cleanup.bytes_freed.saturating_add(size);
                cleanup.removed.push(backup);
            },
            Err(e) => {
                tracing::warn!(path = %backup.display(), error = %e, "could not remove backup");
                cleanup.failed.push((backup, e.to_string()));
            },
        }
    }
    tracing::info!(removed = cleanup.removed.len(), bytes = cleanup.bytes_freed, "backups cleaned");
    return cleanup;
}

/// Find every file whose extension is in `extensions`.
pub fn find_by_extension(root: &Path, rules: &ScanRules, extensions: &[String]) -> Vec<PathBuf> {
    let wanted = normalize_extensions(extensions.to_vec());
    return walk_files(root, rules)
        .into_iter()
        .filter(|p| return has_extension_in(p, &wanted))
        .collect();
}

/// Find editor backup files, for cleanup tooling.
pub fn find_backups(root: &Path, rules: &ScanRules) -> Vec<PathBuf> {
    return find_by_extension(root, rules, &rules.backup_extensions);
}

/// Find every container document under `root`.
pub fn find_documents(root: &Path, rules: &ScanRules) -> Vec<PathBuf> {
    return find_by_extension(root, rules, &rules.document_extensions);
}

/// Whether the file's extension (case-insensitive) is one of `extensions`.
fn has_extension_in(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| return e.to_str()) else {
        return false;
    };
    return extensions.iter().any(|wanted| return wanted.eq_ignore_ascii_case(ext));
}

/// Lowercase extensions and strip any leading dot.
fn normalize_extensions(extensions: Vec<String>) -> Vec<String> {
    return extensions
        .into_iter()
        .map(|e| return e.trim_start_matches('.').to_ascii_lowercase())
        .collect();
}

/// Enumerate documents and assets in a single traversal.
pub fn scan(root: &Path, rules: &ScanRules) -> ProjectInventory {
    let mut inventory = ProjectInventory::default();
    for path in walk_files(root, rules) {
        match rules.classify(&path) {
            FileKind::Asset => inventory.assets.push(path),
            FileKind::Document => inventory.documents.push(path),
            FileKind::Backup | FileKind::Other => {},
        }
    }
    return inventory;
}

/// Depth-first traversal of every regular file under `root`, pruning ignored
/// directories before descending. Returns a lexicographically sorted list.
/// A missing or non-directory root yields an empty list.
pub fn walk_files(root: &Path, rules: &ScanRules) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| return rules.should_visit(e))
        .filter_map(Result::ok)
        .filter(|e| return e.file_type().is_file())
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    return files;
}

/// Translate a `*` wildcard into an anchored regex. Other characters match literally.
fn wildcard_to_regex(pattern: &str) -> Option<Regex> {
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    return Regex::new(&format!("^{body}$")).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn finds_documents_and_assets_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "scenes/b.blend");
        touch(root, "scenes/a.blend");
        touch(root, "textures/wood.PNG");
        touch(root, "notes.txt");

        let inventory = scan(root, &ScanRules::default());
        assert_eq!(inventory.documents, vec![root.join("scenes/a.blend"), root.join("scenes/b.blend")]);
        assert_eq!(inventory.assets, vec![root.join("textures/wood.PNG")]);
    }

    #[test]
    fn prunes_ignored_and_dot_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, ".git/objects/x.blend");
        touch(root, ".cache/y.blend");
        touch(root, "node_modules/z.blend");
        touch(root, "tool.egg-info/w.blend");
        touch(root, "keep/k.blend");

        assert_eq!(find_documents(root, &ScanRules::default()), vec![root.join("keep/k.blend")]);
    }

    #[test]
    fn skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".hidden.blend");
        assert!(find_documents(dir.path(), &ScanRules::default()).is_empty());
    }

    #[test]
    fn missing_or_file_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.blend");
        assert!(walk_files(&dir.path().join("absent"), &ScanRules::default()).is_empty());
        assert!(walk_files(&dir.path().join("a.blend"), &ScanRules::default()).is_empty());
    }

    #[test]
    fn finds_backups_separately() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "s/main.blend");
        touch(dir.path(), "s/main.blend1");
        touch(dir.path(), "s/main.blend2");

        let rules = ScanRules::default();
        assert_eq!(find_backups(dir.path(), &rules).len(), 2);
        assert_eq!(rules.classify(Path::new("x.blend1")), FileKind::Backup);
        assert_eq!(rules.document_kind(Path::new("x.blend")), DocumentKind::Container);
        assert_eq!(rules.document_kind(Path::new("x.png")), DocumentKind::LeafAsset);
    }

    #[test]
    fn cleaning_backups_leaves_documents() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "s/main.blend");
        touch(dir.path(), "s/main.blend1");
        touch(dir.path(), "t/old.blend2");
        touch(dir.path(), ".git/keep.blend1");

        let cleanup = clean_backups(dir.path(), &ScanRules::default());
        assert_eq!(cleanup.removed, vec![dir.path().join("s/main.blend1"), dir.path().join("t/old.blend2")]);
        assert!(cleanup.failed.is_empty());
        assert!(dir.path().join("s/main.blend").exists());
        assert!(dir.path().join(".git/keep.blend1").exists());
        assert!(find_backups(dir.path(), &ScanRules::default()).is_empty());
    }
}
