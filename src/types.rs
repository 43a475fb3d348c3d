//! Core domain types: references, path changes, previews, results, reports.
use std::path::PathBuf;

use serde::Serialize;

/// Project-wide broken link report, grouped by owning document.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BrokenLinkReport {
    /// Documents whose references could not be extracted at all.
    pub failures: Vec<DocumentFailure>,
    /// Documents with at least one broken reference or unresolved name.
    pub files: Vec<FileBrokenLinks>,
    /// Number of documents scanned, including failed ones.
    pub files_checked: usize,
    /// Non-fatal problems, such as a named-item validation that could not run.
    pub warnings: Vec<String>,
}

impl BrokenLinkReport {
    /// Whether the project has no broken references and no scan failures.
    pub fn is_clean(&self) -> bool {
        return self.files.is_empty() && self.failures.is_empty();
    }

    /// Broken path references across the project.
    pub fn total_broken(&self) -> usize {
        return self.files.iter().map(|f| return f.broken.len()).sum();
    }

    /// Path breaks plus unresolved-name breaks across the project.
    pub fn total_issues(&self) -> usize {
        return self.files.iter().map(FileBrokenLinks::total).sum();
    }

    /// Unresolved-name references across the project.
    pub fn total_unresolved_names(&self) -> usize {
        return self.files.iter().map(|f| return f.unresolved_names.len()).sum();
    }
}

/// Kind of a single path mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// Another document's image reference now points at the moved file.
    Image,
    /// The moved container's own image reference is rebased.
    ImageRebase,
    /// Another document's library reference now points at the moved file.
    Library,
    /// The moved container's own library reference is rebased.
    LibraryRebase,
    /// A document could not be scanned; the reason is in `item_name`.
    ScanError,
    /// The moved item itself.
    SelfMove,
}

/// Status of a path change. An `Error` change is never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeStatus {
    /// The change cannot be applied; the reason is in `item_name`.
    Error,
    /// The change is ready to apply.
    Ok,
    /// The change applies but deserves attention.
    Warning,
}

/// A document that fails to scan is recorded, not silently treated as clean.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    /// Document whose scan failed.
    pub document: PathBuf,
    /// Failure message.
    pub reason: String,
}

/// Whether a file owns references of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    /// A scene document that owns relative references and is rebased when moved.
    Container,
    /// A referenced file with no outbound references, such as an image.
    LeafAsset,
}

/// Broken references of one document.
#[derive(Debug, Clone, Serialize)]
pub struct FileBrokenLinks {
    /// References whose resolved path does not exist.
    pub broken: Vec<Reference>,
    /// Document owning the references.
    pub document: PathBuf,
    /// Library items that are no longer present in an existing library.
    pub unresolved_names: Vec<UnresolvedName>,
}

impl FileBrokenLinks {
    /// Broken references plus unresolved names.
    pub fn total(&self) -> usize {
        return self.broken.len().saturating_add(self.unresolved_names.len());
    }
}

/// A library item name ranked against a missing one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameSuggestion {
    /// Candidate item name.
    pub name: String,
    /// Similarity ratio in `[0, 1]`.
    pub ratio: f64,
}

/// What a move or rename would change. Created fresh per preview, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct OperationPreview {
    /// Proposed changes, the moved item first.
    pub changes: Vec<PathChange>,
    /// Problems that make the operation invalid.
    pub errors: Vec<String>,
    /// Human-readable summary of source and destination.
    pub operation_name: String,
    /// References left untouched because their target moves along.
    pub skipped: Vec<SkippedRebase>,
    /// Problems worth showing that do not block the operation.
    pub warnings: Vec<String>,
}

impl OperationPreview {
    /// Changes that may be applied: everything not in `Error` status.
    pub fn applicable_changes(&self) -> impl Iterator<Item = &PathChange> {
        return self.changes.iter().filter(|c| return c.status != ChangeStatus::Error);
    }

    /// Documents other than the moved item that would be rewritten.
    pub fn affected_documents(&self) -> Vec<PathBuf> {
        let mut docs: Vec<PathBuf> = self
            .applicable_changes()
            .filter(|c| return matches!(c.item_kind, ChangeKind::Image | ChangeKind::Library))
            .map(|c| return c.document.clone())
            .collect();
        docs.sort();
        docs.dedup();
        return docs;
    }

    /// An operation is valid when it has no errors.
    pub fn is_valid(&self) -> bool {
        return self.errors.is_empty();
    }

    /// Empty preview for the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        return Self {
            changes: Vec::new(),
            errors: Vec::new(),
            operation_name: operation_name.into(),
            skipped: Vec::new(),
            warnings: Vec::new(),
        };
    }

    /// Number of proposed changes, including error entries.
    pub fn total_changes(&self) -> usize {
        return self.changes.len();
    }
}

/// Outcome of an execute call.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    /// Completed updates, counted as they succeed, never an optimistic total.
    pub changes_made: usize,
    /// Errors collected along the way, including partial failures.
    pub errors: Vec<String>,
    /// Summary for the caller.
    pub message: String,
    /// What happened to the rollback, if one was needed.
    pub rollback: RollbackStatus,
    /// Whether the primary operation completed.
    pub success: bool,
}

impl OperationResult {
    /// A failed operation that made no changes and needed no rollback.
    pub fn failure(message: impl Into<String>, errors: Vec<String>) -> Self {
        return Self {
            changes_made: 0,
            errors,
            message: message.into(),
            rollback: RollbackStatus::NotAttempted,
            success: false,
        };
    }
}

/// One proposed or applied path mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathChange {
    /// Document that owns the changed path, or the moved item for self-moves.
    pub document: PathBuf,
    /// What kind of mutation this is.
    pub item_kind: ChangeKind,
    /// Name of the image or library, or the failure message for error entries.
    pub item_name: String,
    /// Path after the change.
    pub new_path: String,
    /// Path before the change.
    pub old_path: String,
    /// Whether the change may be applied.
    pub status: ChangeStatus,
}

/// Receives coarse progress updates. Must not block: callers bridging to a UI
/// thread are responsible for any dispatch.
pub struct ProgressSink<'a> {
    /// Callback taking a percentage and a message.
    callback: Option<&'a mut dyn FnMut(u8, &str)>,
}

impl<'a> ProgressSink<'a> {
    /// Forward progress to `callback`.
    pub fn new(callback: &'a mut dyn FnMut(u8, &str)) -> Self {
        return Self { callback: Some(callback) };
    }

    /// Discard progress.
    pub const fn none() -> Self {
        return Self { callback: None };
    }

    /// Report a checkpoint. Percentages above 100 are clamped.
    pub fn report(&mut self, percent: u8, message: &str) {
        if let Some(callback) = self.callback.as_mut() {
            callback(percent.min(100), message);
        }
    }

    /// Report progress `done` of `total` mapped into the `from..=to` band.
    pub fn report_span(&mut self, from: u8, to: u8, done: usize, total: usize, message: &str) {
        let span = usize::from(to.saturating_sub(from));
        let offset = span.saturating_mul(done).checked_div(total).unwrap_or(span);
        let percent = from.saturating_add(u8::try_from(offset).unwrap_or(u8::MAX));
        self.report(percent.min(to), message);
    }
}

/// A reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// Document that owns this reference.
    pub document: PathBuf,
    /// Whether the resolved path existed at scan time.
    pub exists: bool,
    /// Whether `stored_path` carries the relative marker.
    pub is_relative: bool,
    /// What the reference points at.
    pub kind: ReferenceKind,
    /// Name of the image or library inside the document.
    pub name: String,
    /// `stored_path` resolved against the owning document's directory.
    pub resolved_path: PathBuf,
    /// Path exactly as written in the document.
    pub stored_path: String,
    /// Reporting-only usage metadata.
    pub usage: ReferenceUsage,
}

/// Kind of an outbound reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// External image file.
    Image,
    /// Another document linked as a library.
    Library,
    /// A named collection inside a linked library.
    NamedCollection,
}

/// Usage metadata carried for reporting only.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceUsage {
    /// Collections linked from a library.
    pub collections: Vec<String>,
    /// Objects linked from a library.
    pub objects: Vec<String>,
    /// Image dimensions in pixels, when known.
    pub pixel_size: Option<(u32, u32)>,
    /// Number of users of an image.
    pub users: u32,
}

/// What happened to the rollback of a failed execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status", content = "reason")]
pub enum RollbackStatus {
    /// The moved item is back at its original location.
    Completed,
    /// The rollback failed; the project may be inconsistent.
    Failed(String),
    /// No rollback was needed.
    NotAttempted,
}

/// A candidate file for a missing one, with its similarity ratio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    /// Path of the candidate file.
    pub candidate: PathBuf,
    /// Similarity ratio in `[0, 1]`.
    pub ratio: f64,
}

/// A reference left alone during a rebase, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct SkippedRebase {
    /// Image or library name.
    pub name: String,
    /// Why it was not rebased.
    pub reason: String,
    /// Path as written in the document.
    #[serde(alias = "path")]
    pub stored_path: String,
}

/// A named library item the document expects but the library no longer has.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedName {
    /// Item names the library does provide.
    pub available: Vec<String>,
    /// Missing item name.
    pub item_name: String,
    /// Library name inside the document.
    pub library_name: String,
    /// Library path as stored in the document.
    pub library_path: String,
    /// Library path resolved against the document's directory.
    pub resolved_library_path: PathBuf,
    /// Best available names, most similar first.
    pub suggestions: Vec<NameSuggestion>,
}
