//! Broken link detection across a whole project.

use std::path::Path;

use crate::engine::{DocumentEngine, Project};
use crate::error::Error;
use crate::paths;
use crate::protocol::BrokenNameEntry;
use crate::references;
use crate::similarity::{self, MatchOptions};
use crate::types::{BrokenLinkReport, DocumentFailure, FileBrokenLinks, UnresolvedName};

/// Check every document under `root`: references whose target is missing, and
/// named library items that are gone from libraries that still exist.
///
/// A document that cannot be scanned lands in `failures`; it never counts as clean
/// and never stops the rest of the scan.
pub fn scan_broken_links(project: &Project<'_>, options: MatchOptions) -> BrokenLinkReport {
    let engine = project.engine;
    let mut report = BrokenLinkReport::default();

    for document in project.documents() {
        report.files_checked = report.files_checked.saturating_add(1);

        let refs = match references::extract(engine, &document) {
            Ok(refs) => refs,
            Err(e) => {
                report.failures.push(DocumentFailure {
                    document: document.clone(),
                    reason: failure_reason(e),
                });
                continue;
            },
        };

        let broken = refs.into_iter().filter(|r| return !r.exists).collect::<Vec<_>>();
        let unresolved_names = unresolved_names(engine, &document, options, &mut report.warnings);
        if broken.is_empty() && unresolved_names.is_empty() {
            continue;
        }
        report.files.push(FileBrokenLinks {
            broken,
            document,
            unresolved_names,
        });
    }

    tracing::info!(
        files_checked = report.files_checked,
        broken = report.total_broken(),
        unresolved_names = report.total_unresolved_names(),
        failures = report.failures.len(),
        "broken link scan finished"
    );
    return report;
}

/// The bare reason of a scan failure.
fn failure_reason(error: Error) -> String {
    return match error {
        Error::ScanFailure { reason, .. } => reason,
        other => other.to_string(),
    };
}

/// Named-item breaks of one document. A failed validation becomes a warning.
fn unresolved_names(
    engine: &dyn DocumentEngine,
    document: &Path,
    options: MatchOptions,
    warnings: &mut Vec<String>,
) -> Vec<UnresolvedName> {
    let envelope = match engine.validate_names(document) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(document = %document.display(), error = %e, "named-item check failed");
            warnings.push(format!("{}: named-item check failed: {e}", document.display()));
            return Vec::new();
        },
    };
    if !envelope.success {
        let reason = envelope.all_errors().join("; ");
        warnings.push(format!("{}: named-item check failed: {reason}", document.display()));
        return Vec::new();
    }

    let owner_dir = references::owner_dir(document);
    return envelope
        .payload
        .broken_collection_refs
        .into_iter()
        .map(|entry| return to_unresolved(entry, &owner_dir, options))
        .collect();
}

/// Engine entry to report entry, with our own ranked suggestions.
fn to_unresolved(entry: BrokenNameEntry, owner_dir: &Path, options: MatchOptions) -> UnresolvedName {
    let resolved_library_path = match entry.resolved_library_path.as_deref().filter(|r| return !r.is_empty()) {
        Some(r) => paths::normalize_path(Path::new(&paths::normalize_separators(r))),
        None => paths::resolve(&entry.library_filepath, owner_dir),
    };
    let suggestions = similarity::rank_names(&entry.collection_name, &entry.available_collections, options);
    return UnresolvedName {
        available: entry.available_collections,
        item_name: entry.collection_name,
        library_name: entry.library_name,
        library_path: entry.library_filepath,
        resolved_library_path,
        suggestions,
    };
}
