//! Move previews: everything a move or rename would change, computed without
//! touching the project.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::engine::Project;
use crate::paths;
use crate::protocol::RebasedPath;
use crate::references::{self, ReferenceSweep};
use crate::scanner;
use crate::types::{
    ChangeKind, ChangeStatus, DocumentKind, OperationPreview, PathChange, ProgressSink, ReferenceKind,
};

/// One file carried by a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedItem {
    /// Container or leaf.
    pub kind: DocumentKind,
    /// Absolute destination.
    pub new: PathBuf,
    /// Absolute source.
    pub old: PathBuf,
}

impl MovedItem {
    /// Directory of the destination.
    pub fn new_dir(&self) -> PathBuf {
        return references::owner_dir(&self.new);
    }

    /// Directory of the source.
    pub fn old_dir(&self) -> PathBuf {
        return references::owner_dir(&self.old);
    }
}

/// Every file a move carries. A file move carries one; a directory move carries
/// each tracked file beneath it.
#[derive(Debug, Clone)]
pub struct MoveSet {
    /// Absolute destination of the moved path.
    pub destination: PathBuf,
    /// Whether the moved path is a directory.
    pub is_dir: bool,
    /// Files carried, in traversal order.
    pub items: Vec<MovedItem>,
    /// Absolute moved path.
    pub source: PathBuf,
}

impl MoveSet {
    /// Enumerate what moving `source` to `destination` carries. Both must be absolute.
    pub fn collect(project: &Project<'_>, source: &Path, destination: &Path) -> Self {
        let is_dir = source.is_dir();
        let items = if is_dir {
            scanner::walk_files(source, project.rules)
                .into_iter()
                .filter_map(|old| {
                    let rel = old.strip_prefix(source).ok()?.to_path_buf();
                    return Some(MovedItem {
                        kind: project.rules.document_kind(&old),
                        new: destination.join(rel),
                        old,
                    });
                })
                .collect()
        } else {
            vec![MovedItem {
                kind: project.rules.document_kind(source),
                new: destination.to_path_buf(),
                old: source.to_path_buf(),
            }]
        };
        return Self {
            destination: destination.to_path_buf(),
            is_dir,
            items,
            source: source.to_path_buf(),
        };
    }

    /// Moved containers.
    pub fn containers(&self) -> impl Iterator<Item = &MovedItem> {
        return self.items.iter().filter(|i| return i.kind == DocumentKind::Container);
    }

    /// Whether `path` sits at or under the moved path.
    pub fn contains(&self, path: &Path) -> bool {
        return path == self.source || (self.is_dir && path.starts_with(&self.source));
    }

    /// Destination of a carried file, by its old path.
    pub fn destination_of(&self, old: &Path) -> Option<&Path> {
        return self.items.iter().find(|i| return i.old == old).map(|i| return i.new.as_path());
    }

    /// Old absolute paths of every carried file.
    pub fn old_paths(&self) -> Vec<PathBuf> {
        return self.items.iter().map(|i| return i.old.clone()).collect();
    }

    /// Distinct `(old, new)` file pairs `document` must be pointed at, per its swept references.
    pub fn updates_for(&self, sweep: &ReferenceSweep, document: &Path) -> Vec<(PathBuf, PathBuf)> {
        let mut pairs: BTreeSet<(PathBuf, PathBuf)> = BTreeSet::new();
        for reference in sweep.hits.get(document).into_iter().flatten() {
            if let Some(new) = self.destination_of(&reference.resolved_path) {
                pairs.insert((reference.resolved_path.clone(), new.to_path_buf()));
            }
        }
        return pairs.into_iter().collect();
    }
}

/// Validation outcome of a proposed move.
#[derive(Debug, Default, Clone)]
pub struct MoveValidation {
    /// Problems that block the move.
    pub errors: Vec<String>,
    /// Whether validation stopped early: nothing else can be computed.
    pub fatal: bool,
    /// Problems worth showing that do not block the move.
    pub warnings: Vec<String>,
}

/// Human-readable `source -> destination`, relative to the root where possible.
fn operation_name(root: &Path, source: &Path, destination: &Path) -> String {
    let show = |p: &Path| return p.strip_prefix(root).unwrap_or(p).display().to_string();
    return format!("Move {} -> {}", show(source), show(destination));
}

/// What moving `source` to `destination` would change. Never mutates anything.
///
/// The moved item comes first as a `self-move` change. Moved containers
/// contribute their internally rebased references; a failed rebase preview is a
/// warning only. Every other document referencing a moved file contributes one
/// change per reference, and a document that cannot be scanned contributes an
/// error change instead of disappearing from the preview.
pub fn preview_move(project: &Project<'_>, source: &Path, destination: &Path) -> OperationPreview {
    let (source, destination) = match (paths::absolute(source), paths::absolute(destination)) {
        (Ok(s), Ok(d)) => (s, d),
        (Err(e), _) | (_, Err(e)) => {
            let mut preview = OperationPreview::new(operation_name(project.root, source, destination));
            preview.errors.push(e.to_string());
            return preview;
        },
    };

    let mut preview = OperationPreview::new(operation_name(project.root, &source, &destination));
    let validation = validate_move(project.root, &source, &destination);
    preview.errors.extend(validation.errors);
    preview.warnings.extend(validation.warnings);
    if validation.fatal {
        return preview;
    }

    let moves = MoveSet::collect(project, &source, &destination);
    for item in &moves.items {
        preview.changes.push(PathChange {
            document: item.old.clone(),
            item_kind: ChangeKind::SelfMove,
            item_name: item
                .old
                .file_name()
                .map(|n| return n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            new_path: item.new.display().to_string(),
            old_path: item.old.display().to_string(),
            status: ChangeStatus::Ok,
        });
    }

    preview_internal_rebases(project, &moves, &mut preview);

    let sweep = sweep_references(project, &moves, &mut ProgressSink::none(), (0, 0));
    for (document, refs) in &sweep.hits {
        for reference in refs {
            let new_path = moves
                .destination_of(&reference.resolved_path)
                .map(|p| return p.display().to_string())
                .unwrap_or_default();
            preview.changes.push(PathChange {
                document: document.clone(),
                item_kind: match reference.kind {
                    ReferenceKind::Image => ChangeKind::Image,
                    ReferenceKind::Library | ReferenceKind::NamedCollection => ChangeKind::Library,
                },
                item_name: reference.name.clone(),
                new_path,
                old_path: reference.stored_path.clone(),
                status: ChangeStatus::Ok,
            });
        }
    }
    for failure in sweep.failures {
        preview.changes.push(PathChange {
            document: failure.document,
            item_kind: ChangeKind::ScanError,
            item_name: format!("Scan error: {}", failure.reason),
            new_path: String::new(),
            old_path: String::new(),
            status: ChangeStatus::Error,
        });
    }

    tracing::info!(
        operation = %preview.operation_name,
        changes = preview.total_changes(),
        errors = preview.errors.len(),
        "move previewed"
    );
    return preview;
}

/// Ask the engine for a dry-run rebase of every moved container.
fn preview_internal_rebases(project: &Project<'_>, moves: &MoveSet, preview: &mut OperationPreview) {
    let co_moved = moves.old_paths();
    for item in moves.containers() {
        let result = project
            .engine
            .rebase_internal(&item.old, &item.old_dir(), &item.new_dir(), &co_moved, true);
        let envelope = match result {
            Ok(envelope) if envelope.success => envelope,
            Ok(envelope) => {
                preview.warnings.push(format!(
                    "internal rebase preview failed for {}: {}",
                    item.old.display(),
                    envelope.all_errors().join("; ")
                ));
                continue;
            },
            Err(e) => {
                preview
                    .warnings
                    .push(format!("internal rebase preview failed for {}: {e}", item.old.display()));
                continue;
            },
        };

        preview.warnings.extend(envelope.warnings);
        let rebased = envelope.payload;
        let as_change = |path: RebasedPath, kind: ChangeKind| {
            return PathChange {
                document: item.old.clone(),
                item_kind: kind,
                item_name: path.name,
                new_path: path.new_path,
                old_path: path.old_path,
                status: ChangeStatus::Ok,
            };
        };
        preview
            .changes
            .extend(rebased.rebased_images.into_iter().map(|p| return as_change(p, ChangeKind::ImageRebase)));
        preview
            .changes
            .extend(rebased.rebased_libraries.into_iter().map(|p| return as_change(p, ChangeKind::LibraryRebase)));
        preview.skipped.extend(rebased.skipped);
    }
}

/// Scan every document the move does not carry for references resolving to a carried file.
/// Progress is reported within the `band` percentage range.
pub fn sweep_references(
    project: &Project<'_>,
    moves: &MoveSet,
    progress: &mut ProgressSink<'_>,
    band: (u8, u8),
) -> ReferenceSweep {
    let targets: BTreeSet<PathBuf> = moves.old_paths().into_iter().collect();
    let documents: Vec<PathBuf> = project.documents().into_iter().filter(|d| return !moves.contains(d)).collect();
    return references::sweep(project.engine, documents, &targets, progress, band);
}

/// Check a proposed move against the filesystem. Paths must be absolute.
///
/// A missing source, or a source equal to its destination, is fatal. An
/// occupied destination is an error that still lets a preview be computed.
pub fn validate_move(root: &Path, source: &Path, destination: &Path) -> MoveValidation {
    let mut validation = MoveValidation::default();
    if !source.exists() {
        validation.errors.push(format!("source does not exist: {}", source.display()));
        validation.fatal = true;
        return validation;
    }
    if source == destination {
        validation
            .errors
            .push(format!("source and destination are the same path: {}", source.display()));
        validation.fatal = true;
        return validation;
    }
    if source.is_dir() && destination.starts_with(source) {
        validation
            .errors
            .push(format!("cannot move {} into itself", source.display()));
        validation.fatal = true;
        return validation;
    }
    if destination.exists() {
        validation
            .errors
            .push(format!("destination already exists: {}", destination.display()));
    }

    if !source.starts_with(root) {
        validation
            .warnings
            .push(format!("source is outside the project root: {}", source.display()));
    }
    if !destination.starts_with(root) {
        validation
            .warnings
            .push(format!("destination is outside the project root: {}", destination.display()));
    }
    if let Some(parent) = destination.parent()
        && !parent.exists()
    {
        validation
            .warnings
            .push(format!("destination directory will be created: {}", parent.display()));
    }
    return validation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let v = validate_move(dir.path(), &dir.path().join("a.png"), &dir.path().join("b.png"));
        assert!(v.fatal);
        assert_eq!(v.errors.len(), 1);
    }

    #[test]
    fn occupied_destination_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::write(dir.path().join("b.png"), b"b").unwrap();
        let v = validate_move(dir.path(), &dir.path().join("a.png"), &dir.path().join("b.png"));
        assert!(!v.fatal);
        assert_eq!(v.errors.len(), 1);
    }

    #[test]
    fn same_path_and_self_nesting_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("textures");
        std::fs::create_dir_all(&sub).unwrap();
        assert!(validate_move(dir.path(), &sub, &sub).fatal);
        assert!(validate_move(dir.path(), &sub, &sub.join("inner")).fatal);
    }

    #[test]
    fn outside_root_and_missing_parent_are_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.png"), b"a").unwrap();
        let v = validate_move(&root, &root.join("a.png"), &dir.path().join("elsewhere/a.png"));
        assert!(v.errors.is_empty());
        assert_eq!(v.warnings.len(), 2);
    }
}
