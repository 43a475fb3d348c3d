//! Move execution: relocate the item, rewrite the documents that point at it,
//! and put everything back when a step fails partway.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::engine::Project;
use crate::error::Error;
use crate::hasher;
use crate::paths;
use crate::planner::{self, MoveSet, MovedItem};
use crate::protocol::Rebased;
use crate::types::{DocumentKind, OperationResult, ProgressSink, RollbackStatus};

/// Side effects applied so far, in order, so a rollback can undo them.
#[derive(Debug, Default)]
struct Applied {
    /// Completed updates: moved files plus every stored path rewritten.
    changes_made: usize,
    /// Non-fatal problems along the way.
    errors: Vec<String>,
    /// Containers rebased in place after a directory move.
    rebased: Vec<MovedItem>,
    /// Internal paths rebased in moved containers.
    rebased_paths: usize,
    /// References rewritten in documents outside the move.
    references_updated: usize,
    /// Documents rewritten, with the `(old, new)` pair each was pointed at.
    updated: Vec<(PathBuf, PathBuf, PathBuf)>,
}

/// Create the missing ancestors of `path`. Returns the directories created,
/// innermost first.
///
/// # Errors
///
/// Returns `Error::Io` if a directory cannot be created.
fn create_parents(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut missing = Vec::new();
    let mut current = path.parent();
    while let Some(dir) = current
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    return Ok(missing);
}

/// Move `source` to `destination` and update every document that references what moved.
///
/// Preconditions are checked again here; a stale preview is never trusted. A
/// container is relocated by the engine, which rebases its own references. A
/// leaf or directory is moved on disk. Documents are then rewritten only where a
/// reference was actually found. If the engine cannot be reached mid-update,
/// rewritten documents are reverted and the item is moved back; the result
/// reports whether that rollback completed.
pub fn execute_move(
    project: &Project<'_>,
    source: &Path,
    destination: &Path,
    progress: &mut ProgressSink<'_>,
) -> OperationResult {
    progress.report(0, "Validating");
    let (source, destination) = match (paths::absolute(source), paths::absolute(destination)) {
        (Ok(s), Ok(d)) => (s, d),
        (Err(e), _) | (_, Err(e)) => return OperationResult::failure(format!("Cannot move: {e}"), vec![e.to_string()]),
    };
    let validation = planner::validate_move(project.root, &source, &destination);
    if let Some(first) = validation.errors.first() {
        return OperationResult::failure(format!("Cannot move {}: {first}", source.display()), validation.errors);
    }

    let moves = MoveSet::collect(project, &source, &destination);
    progress.report(5, "Scanning for references");
    let sweep = planner::sweep_references(project, &moves, progress, (5, 20));

    let mut applied = Applied::default();
    for failure in &sweep.failures {
        tracing::warn!(document = %failure.document.display(), reason = %failure.reason, "document not updated");
        applied
            .errors
            .push(format!("could not scan {}: {}", failure.document.display(), failure.reason));
    }

    progress.report(20, &format!("Moving {}", source.display()));
    match move_primary(project, &moves, &mut applied) {
        Ok(rebased) => applied.rebased_paths = rebased,
        Err(e) => {
            tracing::error!(source = %source.display(), error = %e, "move failed");
            let mut errors = applied.errors;
            errors.push(e.to_string());
            return OperationResult::failure(format!("Failed to move {}: {e}", source.display()), errors);
        },
    }
    applied.changes_made = moves.items.len().max(1).saturating_add(applied.rebased_paths);

    match rebase_moved_containers(project, &moves, &mut applied) {
        Ok(rebased) => {
            applied.rebased_paths = applied.rebased_paths.saturating_add(rebased);
            applied.changes_made = applied.changes_made.saturating_add(rebased);
        },
        Err(e) => return roll_back(project, &moves, applied, &e, progress),
    }

    let pending: Vec<(PathBuf, PathBuf, PathBuf)> = sweep
        .hits
        .keys()
        .flat_map(|doc| {
            return moves
                .updates_for(&sweep, doc)
                .into_iter()
                .map(move |(old, new)| return (doc.clone(), old, new));
        })
        .collect();
    let total = pending.len();
    for (done, (document, old, new)) in pending.into_iter().enumerate() {
        progress.report_span(20, 95, done, total, &format!("Updating {}", document.display()));
        match project.engine.update_paths(&document, &old, &new) {
            Ok(envelope) if envelope.success => {
                let rewritten = envelope.payload.changes_count;
                if rewritten == 0 {
                    tracing::debug!(document = %document.display(), "no reference needed rewriting");
                    continue;
                }
                applied.changes_made = applied.changes_made.saturating_add(rewritten);
                applied.references_updated = applied.references_updated.saturating_add(rewritten);
                applied.updated.push((document, old, new));
            },
            Ok(envelope) => {
                let reason = envelope.all_errors().join("; ");
                tracing::warn!(document = %document.display(), %reason, "reference update refused");
                applied.errors.push(format!("could not update {}: {reason}", document.display()));
            },
            Err(e) => return roll_back(project, &moves, applied, &e, progress),
        }
    }

    progress.report(100, "Complete");
    let mut message = format!("Moved {} to {}", source.display(), destination.display());
    if applied.rebased_paths > 0 {
        message.push_str(&format!(", rebased {} internal path(s)", applied.rebased_paths));
    }
    if applied.references_updated > 0 {
        message.push_str(&format!(", updated {} reference(s)", applied.references_updated));
    }
    if !applied.errors.is_empty() {
        message.push_str(&format!(" with {} problem(s)", applied.errors.len()));
    }
    tracing::info!(changes = applied.changes_made, problems = applied.errors.len(), "{message}");

    return OperationResult {
        changes_made: applied.changes_made,
        errors: applied.errors,
        message,
        rollback: RollbackStatus::NotAttempted,
        success: true,
    };
}

/// Move the directory back, then rebase its containers back to their old directories.
///
/// # Errors
///
/// Returns `Error::Io` if the rename fails.
fn move_dir_back(project: &Project<'_>, moves: &MoveSet, rebased: &[MovedItem], failures: &mut Vec<String>) -> Result<(), Error> {
    fs::rename(&moves.destination, &moves.source)?;
    let new_paths: Vec<PathBuf> = moves.items.iter().map(|i| return i.new.clone()).collect();
    for item in rebased {
        match project
            .engine
            .rebase_internal(&item.old, &item.new_dir(), &item.old_dir(), &new_paths, false)
        {
            Ok(envelope) if envelope.success => {},
            Ok(envelope) => failures.push(format!(
                "could not rebase {} back: {}",
                item.old.display(),
                envelope.all_errors().join("; ")
            )),
            Err(e) => failures.push(format!("could not rebase {} back: {e}", item.old.display())),
        }
    }
    return Ok(());
}

/// Rename a file, falling back to copy, verify, delete when the rename would
/// cross filesystems. Creates the destination's parent directories.
///
/// # Errors
///
/// Returns `Error::Io` on filesystem failure or `Error::VerificationFailed`
/// if the copy does not match the original.
pub fn move_file(from: &Path, to: &Path) -> Result<(), Error> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            tracing::debug!(from = %from.display(), to = %to.display(), "rename crosses devices, staging copy");
        },
        Err(e) => return Err(Error::Io(e)),
    }
    return staged_copy(from, to);
}

/// Put the moved item back at its source. Refuses to overwrite anything there.
fn move_item_back(project: &Project<'_>, moves: &MoveSet, rebased: &[MovedItem], failures: &mut Vec<String>) {
    if moves.source.exists() {
        failures.push(format!(
            "{} is occupied; {} left in place",
            moves.source.display(),
            moves.destination.display()
        ));
        return;
    }
    if !moves.destination.exists() {
        failures.push(format!("{} no longer exists", moves.destination.display()));
        return;
    }

    let single_container = !moves.is_dir && moves.items.first().is_some_and(|i| return i.kind == DocumentKind::Container);
    let result = if moves.is_dir {
        move_dir_back(project, moves, rebased, failures)
    } else if single_container {
        project
            .engine
            .relocate(&moves.destination, &moves.source, true, false)
            .and_then(|envelope| {
                return envelope
                    .into_payload("move_scene", &moves.destination)
                    .map(|_| return ());
            })
    } else {
        move_file(&moves.destination, &moves.source)
    };
    if let Err(e) = result {
        failures.push(format!("could not move {} back: {e}", moves.destination.display()));
    }
}

/// Relocate the moved item into its destination directory, creating that
/// directory as needed. Returns how many internal paths the engine rebased.
///
/// # Errors
///
/// Returns the engine or filesystem failure; nothing has moved and no new
/// directory is left behind when this fails.
fn move_primary(project: &Project<'_>, moves: &MoveSet, applied: &mut Applied) -> Result<usize, Error> {
    let created = create_parents(&moves.destination)?;
    let result = relocate_primary(project, moves, applied);
    if result.is_err() {
        remove_created(&created);
    }
    return result;
}

/// Rebase each carried container at its new location after a directory move.
/// Returns how many internal paths were rebased.
///
/// # Errors
///
/// Returns a transport error from the engine; a refusal is recorded and skipped.
fn rebase_moved_containers(project: &Project<'_>, moves: &MoveSet, applied: &mut Applied) -> Result<usize, Error> {
    if !moves.is_dir {
        return Ok(0);
    }
    let co_moved = moves.old_paths();
    let mut rebased_paths = 0_usize;
    for item in moves.containers() {
        let envelope = project
            .engine
            .rebase_internal(&item.new, &item.old_dir(), &item.new_dir(), &co_moved, false)?;
        if !envelope.success {
            let reason = envelope.all_errors().join("; ");
            tracing::warn!(document = %item.new.display(), %reason, "internal rebase refused");
            applied.errors.push(format!("could not rebase {}: {reason}", item.new.display()));
            continue;
        }
        let count = rebased_count(&envelope.payload);
        if count > 0 {
            rebased_paths = rebased_paths.saturating_add(count);
            applied.rebased.push(item.clone());
        }
    }
    return Ok(rebased_paths);
}

/// Image and library paths a rebase rewrote.
fn rebased_count(rebased: &Rebased) -> usize {
    return rebased.rebased_images.len().saturating_add(rebased.rebased_libraries.len());
}

/// Move the item itself: a directory or leaf on disk, a container through the engine.
///
/// # Errors
///
/// Returns the engine or filesystem failure.
fn relocate_primary(project: &Project<'_>, moves: &MoveSet, applied: &mut Applied) -> Result<usize, Error> {
    if moves.is_dir {
        return match fs::rename(&moves.source, &moves.destination) {
            Ok(()) => Ok(0),
            Err(e) if e.kind() == ErrorKind::CrossesDevices => Err(Error::validation(format!(
                "cannot move directory {} across filesystems",
                moves.source.display()
            ))),
            Err(e) => Err(Error::Io(e)),
        };
    }

    let is_container = moves.items.first().is_some_and(|i| return i.kind == DocumentKind::Container);
    if !is_container {
        move_file(&moves.source, &moves.destination)?;
        return Ok(0);
    }

    let relocated = project
        .engine
        .relocate(&moves.source, &moves.destination, true, false)?
        .into_payload("move_scene", &moves.source)?;
    if !relocated.old_deleted && moves.source.exists() {
        applied
            .errors
            .push(format!("old copy was not deleted: {}", moves.source.display()));
    }
    return Ok(rebased_count(&relocated.rebased));
}

/// Remove directories made by [`create_parents`], innermost first. Only empty ones go.
fn remove_created(created: &[PathBuf]) {
    for dir in created {
        if let Err(e) = fs::remove_dir(dir) {
            tracing::debug!(dir = %dir.display(), error = %e, "left directory in place");
        }
    }
}

/// Undo what was applied, newest first, and build the failure result.
fn roll_back(
    project: &Project<'_>,
    moves: &MoveSet,
    applied: Applied,
    cause: &Error,
    progress: &mut ProgressSink<'_>,
) -> OperationResult {
    let original = cause.to_string();
    tracing::error!(source = %moves.source.display(), error = %original, "move failed after relocation, rolling back");

    let mut failures = Vec::new();
    for (document, old, new) in applied.updated.iter().rev() {
        match project.engine.update_paths(document, new, old) {
            Ok(envelope) if envelope.success => {},
            Ok(envelope) => failures.push(format!(
                "could not revert {}: {}",
                document.display(),
                envelope.all_errors().join("; ")
            )),
            Err(e) => failures.push(format!("could not revert {}: {e}", document.display())),
        }
    }
    move_item_back(project, moves, &applied.rebased, &mut failures);

    let mut errors = applied.errors;
    errors.push(original.clone());
    if failures.is_empty() {
        progress.report(100, "Operation failed, rolled back");
        return OperationResult {
            changes_made: 0,
            errors,
            message: format!("Operation failed: {original}; rolled back"),
            rollback: RollbackStatus::Completed,
            success: false,
        };
    }

    let rollback = failures.join("; ");
    tracing::error!(original = %original, rollback = %rollback, "rollback failed, project may be inconsistent");
    errors.push(format!("rollback failed: {rollback}"));
    progress.report(100, "Operation failed, rollback incomplete");
    return OperationResult {
        changes_made: applied.changes_made,
        errors,
        message: Error::RollbackFailed {
            original,
            rollback: rollback.clone(),
        }
        .to_string(),
        rollback: RollbackStatus::Failed(rollback),
        success: false,
    };
}

/// Copy, compare digests, then delete the original. A bad copy is removed.
///
/// # Errors
///
/// Returns `Error::Io` on filesystem failure or `Error::VerificationFailed` on digest mismatch.
fn staged_copy(from: &Path, to: &Path) -> Result<(), Error> {
    fs::copy(from, to)?;
    match hasher::same_contents(from, to) {
        Ok(true) => {},
        Ok(false) => {
            let _ = fs::remove_file(to);
            return Err(Error::VerificationFailed {
                destination: to.to_path_buf(),
                origin: from.to_path_buf(),
            });
        },
        Err(e) => {
            let _ = fs::remove_file(to);
            return Err(e);
        },
    }
    fs::remove_file(from)?;
    return Ok(());
}
