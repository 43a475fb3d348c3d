//! Relink planning and application for broken references: missing files are
//! pointed at exact or chosen replacements, and links to missing named items
//! are pointed at another item of the same library.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::DocumentEngine;
use crate::paths;
use crate::protocol::NameRemap;
use crate::references;
use crate::scanner::ScanRules;
use crate::similarity::{self, Candidates, MatchOptions};
use crate::types::{BrokenLinkReport, OperationResult, RollbackStatus, SimilarityMatch};

/// How one missing filename would be repaired.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "resolution")]
pub enum Resolution {
    /// An exact match was found and is staged automatically.
    Auto {
        /// File every reference to the missing name will point at.
        target: PathBuf,
    },
    /// Similar files for a person to choose from, best first.
    Choose {
        /// Ranked candidates.
        matches: Vec<SimilarityMatch>,
    },
    /// Nothing cleared the similarity threshold.
    NoCandidate,
}

/// Repair proposal for every broken reference sharing one missing filename.
#[derive(Debug, Clone, Serialize)]
pub struct RelinkEntry {
    /// Missing filename.
    pub filename: String,
    /// What to do about it.
    pub resolution: Resolution,
    /// Distinct stored paths that end in this filename.
    pub stored_paths: Vec<String>,
}

/// Repair proposals for a broken link report.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RelinkPlan {
    /// One entry per missing filename, sorted by filename.
    pub entries: Vec<RelinkEntry>,
    /// Ambiguities and skipped names.
    pub warnings: Vec<String>,
}

impl RelinkPlan {
    /// Remaps staged automatically: old stored path to new absolute path.
    pub fn auto_remap(&self) -> BTreeMap<String, PathBuf> {
        let mut remap = BTreeMap::new();
        for entry in &self.entries {
            if let Resolution::Auto { target } = &entry.resolution {
                for stored in &entry.stored_paths {
                    remap.insert(stored.clone(), target.clone());
                }
            }
        }
        return remap;
    }
}

/// Relink missing named items document by document.
///
/// `renames` maps a missing item name to its replacement. A replacement the
/// library does not provide is reported and never sent to the engine. A
/// document with nothing to rename is never opened.
pub fn apply_name_remap(
    engine: &dyn DocumentEngine,
    report: &BrokenLinkReport,
    renames: &BTreeMap<String, String>,
) -> OperationResult {
    let mut changes_made = 0_usize;
    let mut documents = 0_usize;
    let mut errors = Vec::new();

    for file in &report.files {
        let mut remappings = Vec::new();
        for name in &file.unresolved_names {
            let Some(new_name) = renames.get(&name.item_name) else { continue };
            if !name.available.contains(new_name) {
                errors.push(format!(
                    "{} does not provide {new_name}; {} left unresolved in {}",
                    name.library_name,
                    name.item_name,
                    file.document.display()
                ));
                continue;
            }
            remappings.push(NameRemap {
                library_filepath: name.library_path.clone(),
                library_name: name.library_name.clone(),
                new_collection_name: new_name.clone(),
                old_collection_name: name.item_name.clone(),
            });
        }
        if remappings.is_empty() {
            continue;
        }

        match engine.remap_names(&file.document, &remappings) {
            Ok(envelope) if envelope.success => {
                let remapped = envelope.payload.total_remapped;
                changes_made = changes_made.saturating_add(remapped);
                if remapped > 0 {
                    documents = documents.saturating_add(1);
                }
                for failed in envelope.payload.failed_remappings {
                    let mut reasons = failed.errors;
                    reasons.extend(failed.error);
                    errors.push(format!(
                        "could not relink {} to {} in {}: {}",
                        failed.old_name,
                        failed.new_name,
                        file.document.display(),
                        reasons.join("; ")
                    ));
                }
                tracing::info!(document = %file.document.display(), remapped, "named items relinked");
            },
            Ok(envelope) => {
                errors.push(format!(
                    "could not relink names in {}: {}",
                    file.document.display(),
                    envelope.all_errors().join("; ")
                ));
            },
            Err(e) => {
                tracing::warn!(document = %file.document.display(), error = %e, "name relink failed");
                errors.push(format!("could not relink names in {}: {e}", file.document.display()));
            },
        }
    }

    return OperationResult {
        changes_made,
        message: format!("Relinked {changes_made} named item(s) in {documents} document(s)"),
        rollback: RollbackStatus::NotAttempted,
        success: errors.is_empty(),
        errors,
    };
}

/// Rewrite remapped references document by document.
///
/// Each new path is stored relative to the owning document. A document with
/// nothing to remap is never opened.
pub fn apply_remap(
    engine: &dyn DocumentEngine,
    report: &BrokenLinkReport,
    remap: &BTreeMap<String, PathBuf>,
) -> OperationResult {
    let mut changes_made = 0_usize;
    let mut documents = 0_usize;
    let mut errors = Vec::new();

    for file in &report.files {
        let owner_dir = references::owner_dir(&file.document);
        let applicable: BTreeMap<String, String> = file
            .broken
            .iter()
            .filter_map(|r| {
                let target = remap.get(&r.stored_path)?;
                return Some((r.stored_path.clone(), paths::make_relative(target, &owner_dir)));
            })
            .collect();
        if applicable.is_empty() {
            continue;
        }

        match engine.apply_remap(&file.document, &applicable) {
            Ok(envelope) if envelope.success => {
                changes_made = changes_made.saturating_add(envelope.payload.total_relinked);
                documents = documents.saturating_add(1);
                tracing::info!(
                    document = %file.document.display(),
                    relinked = envelope.payload.total_relinked,
                    "references relinked"
                );
            },
            Ok(envelope) => {
                errors.push(format!(
                    "could not relink {}: {}",
                    file.document.display(),
                    envelope.all_errors().join("; ")
                ));
            },
            Err(e) => {
                tracing::warn!(document = %file.document.display(), error = %e, "relink failed");
                errors.push(format!("could not relink {}: {e}", file.document.display()));
            },
        }
    }

    return OperationResult {
        changes_made,
        message: format!("Relinked {changes_made} path(s) in {documents} document(s)"),
        rollback: RollbackStatus::NotAttempted,
        success: errors.is_empty(),
        errors,
    };
}

/// Filename a stored path ends in.
fn filename_of(stored: &str) -> Option<String> {
    let normalized = paths::normalize_separators(stored);
    let name = normalized.rsplit('/').next()?;
    if name.is_empty() {
        return None;
    }
    return Some(name.to_string());
}

/// Propose a repair for each missing filename in `report`: an exact match is
/// staged automatically (the first one, with a warning, when several exist),
/// otherwise the best similar files are offered.
pub fn plan_relink(report: &BrokenLinkReport, root: &Path, rules: &ScanRules, options: MatchOptions) -> RelinkPlan {
    let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for reference in report.files.iter().flat_map(|f| return f.broken.iter()) {
        let Some(name) = filename_of(&reference.stored_path) else { continue };
        let stored = by_name.entry(name).or_default();
        if !stored.contains(&reference.stored_path) {
            stored.push(reference.stored_path.clone());
        }
    }

    let mut plan = RelinkPlan::default();
    for (filename, stored_paths) in by_name {
        let resolution = match similarity::find_candidates(&filename, root, rules, options) {
            Ok(Candidates::Exact(found)) => {
                if found.len() > 1 {
                    plan.warnings.push(format!(
                        "{} files named {filename}; using {}",
                        found.len(),
                        found.first().map(|p| return p.display().to_string()).unwrap_or_default()
                    ));
                }
                match found.into_iter().next() {
                    Some(target) => Resolution::Auto { target },
                    None => Resolution::NoCandidate,
                }
            },
            Ok(Candidates::Fuzzy(matches)) => Resolution::Choose { matches },
            Ok(Candidates::None) => Resolution::NoCandidate,
            Err(e) => {
                plan.warnings.push(format!("{filename}: {e}"));
                continue;
            },
        };
        plan.entries.push(RelinkEntry {
            filename,
            resolution,
            stored_paths,
        });
    }
    return plan;
}

/// The best suggestion for every missing named item that has one.
pub fn suggested_renames(report: &BrokenLinkReport) -> BTreeMap<String, String> {
    let mut renames = BTreeMap::new();
    for name in report.files.iter().flat_map(|f| return f.unresolved_names.iter()) {
        if let Some(best) = name.suggestions.first() {
            renames.entry(name.item_name.clone()).or_insert_with(|| return best.name.clone());
        }
    }
    return renames;
}
