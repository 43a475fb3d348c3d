//! Reference extraction: ask the engine what a document points at, and which
//! documents point at a given file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::{DocumentEngine, Project};
use crate::error::Error;
use crate::paths;
use crate::protocol::{ImageEntry, LibraryEntry, SceneEntry};
use crate::scanner;
use crate::types::{DocumentFailure, ProgressSink, Reference, ReferenceKind, ReferenceUsage};

/// References to a set of target files, found by scanning documents.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReferenceSweep {
    /// Documents that could not be scanned.
    pub failures: Vec<DocumentFailure>,
    /// Matching references, keyed by owning document.
    pub hits: BTreeMap<PathBuf, Vec<Reference>>,
}

impl ReferenceSweep {
    /// Number of matching references across every document.
    pub fn total_references(&self) -> usize {
        return self.hits.values().map(Vec::len).sum();
    }
}

/// Outbound references of `document`, excluding packed images and empty stored paths.
///
/// Every failure, whether transport or a `success: false` answer, comes back as
/// `Error::ScanFailure` so callers can record it and move on.
///
/// # Errors
///
/// Returns `Error::ScanFailure` if the references cannot be read.
pub fn extract(engine: &dyn DocumentEngine, document: &Path) -> Result<Vec<Reference>, Error> {
    let envelope = engine.extract_references(document).map_err(|e| return scan_failure(document, &e.to_string()))?;
    for warning in &envelope.warnings {
        tracing::warn!(document = %document.display(), "{warning}");
    }
    if !envelope.success {
        return Err(scan_failure(document, &envelope.all_errors().join("; ")));
    }

    let owner_dir = owner_dir(document);
    let mut references = Vec::new();
    for image in &envelope.payload.images {
        if let Some(reference) = from_image(document, &owner_dir, image) {
            references.push(reference);
        }
    }
    for library in &envelope.payload.libraries {
        if let Some(reference) = from_library(document, &owner_dir, library) {
            references.push(reference);
        }
    }
    tracing::debug!(document = %document.display(), count = references.len(), "references extracted");
    return Ok(references);
}

/// Image entry to reference; packed and pathless images have no file to track.
fn from_image(document: &Path, owner_dir: &Path, entry: &ImageEntry) -> Option<Reference> {
    if entry.packed || entry.filepath.is_empty() {
        return None;
    }
    return Some(Reference {
        document: document.to_path_buf(),
        exists: entry.exists,
        is_relative: paths::is_relative(&entry.filepath),
        kind: ReferenceKind::Image,
        name: entry.name.clone(),
        resolved_path: resolved(entry.resolved.as_deref(), &entry.filepath, owner_dir),
        stored_path: entry.filepath.clone(),
        usage: ReferenceUsage {
            collections: Vec::new(),
            objects: Vec::new(),
            pixel_size: entry.size.map(|[w, h]| return (w, h)),
            users: entry.users,
        },
    });
}

/// Library entry to reference.
fn from_library(document: &Path, owner_dir: &Path, entry: &LibraryEntry) -> Option<Reference> {
    if entry.filepath.is_empty() {
        return None;
    }
    return Some(Reference {
        document: document.to_path_buf(),
        exists: entry.exists,
        is_relative: paths::is_relative(&entry.filepath),
        kind: ReferenceKind::Library,
        name: entry.name.clone(),
        resolved_path: resolved(entry.resolved.as_deref(), &entry.filepath, owner_dir),
        stored_path: entry.filepath.clone(),
        usage: ReferenceUsage {
            collections: entry.collections.clone(),
            objects: entry.objects.clone(),
            pixel_size: None,
            users: 0,
        },
    });
}

/// Directory that relative paths stored in `document` resolve against.
pub fn owner_dir(document: &Path) -> PathBuf {
    return document.parent().map(Path::to_path_buf).unwrap_or_default();
}

/// The engine's resolution when it gave one, else our own against the owner's directory.
fn resolved(engine_resolved: Option<&str>, stored: &str, owner_dir: &Path) -> PathBuf {
    return match engine_resolved.filter(|r| return !r.is_empty()) {
        Some(r) => paths::normalize_path(Path::new(&paths::normalize_separators(r))),
        None => paths::resolve(stored, owner_dir),
    };
}

/// Wrap any failure as a per-document scan failure.
fn scan_failure(document: &Path, reason: &str) -> Error {
    tracing::warn!(document = %document.display(), reason, "reference scan failed");
    return Error::ScanFailure {
        document: document.to_path_buf(),
        reason: reason.to_string(),
    };
}

/// Every document in the project that references `target`, or any file under
/// it when `target` is a directory. `target` need not exist: references to a
/// missing file are found the same way.
///
/// # Errors
///
/// Returns `Error::Io` if `target` cannot be made absolute.
pub fn referencing_documents(project: &Project<'_>, target: &Path) -> Result<ReferenceSweep, Error> {
    let target = paths::absolute(target)?;
    let targets: BTreeSet<PathBuf> = if target.is_dir() {
        scanner::walk_files(&target, project.rules).into_iter().collect()
    } else {
        BTreeSet::from([target.clone()])
    };
    let documents: Vec<PathBuf> = project.documents().into_iter().filter(|d| return *d != target).collect();
    let found = sweep(project.engine, documents, &targets, &mut ProgressSink::none(), (0, 0));
    tracing::info!(
        target = %target.display(),
        documents = found.hits.len(),
        failures = found.failures.len(),
        "reverse references collected"
    );
    return Ok(found);
}

/// Scenes of a container document.
///
/// # Errors
///
/// Returns a transport error, or `Error::EngineFailure` if the engine refuses.
pub fn scenes(engine: &dyn DocumentEngine, document: &Path) -> Result<Vec<SceneEntry>, Error> {
    let envelope = engine.list_scenes(document)?;
    return Ok(envelope.into_payload("list_scenes", document)?.scenes);
}

/// Scan `documents` for references resolving to any of `targets`. Progress is
/// reported within the `band` percentage range.
pub fn sweep(
    engine: &dyn DocumentEngine,
    documents: Vec<PathBuf>,
    targets: &BTreeSet<PathBuf>,
    progress: &mut ProgressSink<'_>,
    band: (u8, u8),
) -> ReferenceSweep {
    let total = documents.len();
    let mut found = ReferenceSweep::default();
    for (done, document) in documents.into_iter().enumerate() {
        progress.report_span(band.0, band.1, done, total, &format!("Scanning {}", document.display()));
        match extract(engine, &document) {
            Ok(refs) => {
                let hits: Vec<Reference> = refs.into_iter().filter(|r| return targets.contains(&r.resolved_path)).collect();
                if !hits.is_empty() {
                    found.hits.insert(document, hits);
                }
            },
            Err(e) => {
                let reason = match e {
                    Error::ScanFailure { reason, .. } => reason,
                    other => other.to_string(),
                };
                found.failures.push(DocumentFailure { document, reason });
            },
        }
    }
    return found;
}
