//! Document Engine wire protocol.
//!
//! A request is an operation name plus `--key value` string arguments. The
//! response is one JSON object printed after [`RESPONSE_MARKER`] on stdout;
//! anything after that object is ignored. Every response shares an envelope of
//! `success`, `errors` and `warnings`, with the operation's payload fields
//! flattened alongside.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{ReferenceKind, SkippedRebase};

/// Literal that precedes the JSON response on the engine's stdout.
pub const RESPONSE_MARKER: &str = "JSON_OUTPUT:";

/// Prefix of progress lines the engine prints before its response.
pub const LOG_PREFIX: &str = "LOG:";

/// Response to `validate_collection_names`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BrokenNames {
    /// Named items a document expects but its library lacks.
    #[serde(default)]
    pub broken_collection_refs: Vec<BrokenNameEntry>,
}

/// One unresolved named item inside an existing library.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokenNameEntry {
    /// Item names the library does provide.
    #[serde(default)]
    pub available_collections: Vec<String>,
    /// Missing item name.
    pub collection_name: String,
    /// Library path as stored in the document.
    pub library_filepath: String,
    /// Library name inside the document.
    pub library_name: String,
    /// Library path resolved by the engine.
    #[serde(default)]
    pub resolved_library_path: Option<String>,
}

/// Common response envelope around an operation-specific payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Single error message some scripts report instead of `errors`.
    #[serde(default)]
    pub error: Option<String>,
    /// Error messages.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Operation-specific fields.
    #[serde(flatten)]
    pub payload: T,
    /// The only authority on whether the operation succeeded.
    pub success: bool,
    /// Non-fatal messages.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl<T> Envelope<T> {
    /// Every error message, including the single `error` field when present.
    pub fn all_errors(&self) -> Vec<String> {
        let mut all = self.errors.clone();
        if let Some(single) = &self.error {
            all.push(single.clone());
        }
        if all.is_empty() && !self.success {
            all.push("engine reported failure without a message".to_string());
        }
        return all;
    }

    /// The payload when the engine reported success.
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineFailure` when `success` is false.
    pub fn into_payload(self, operation: &str, document: &Path) -> Result<T, Error> {
        if !self.success {
            return Err(Error::EngineFailure {
                document: document.to_path_buf(),
                errors: self.all_errors(),
                operation: operation.to_string(),
            });
        }
        return Ok(self.payload);
    }
}

/// One named-item remap the engine could not apply.
#[derive(Debug, Clone, Deserialize)]
pub struct FailedNameRemap {
    /// Single reason, when the script reports one.
    #[serde(default)]
    pub error: Option<String>,
    /// Reasons.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Requested replacement name.
    pub new_name: String,
    /// Missing item name.
    pub old_name: String,
}

/// An image entry of a `scan_references` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageEntry {
    /// Whether the resolved file existed when the engine looked.
    #[serde(default)]
    pub exists: bool,
    /// Stored path.
    #[serde(default)]
    pub filepath: String,
    /// Whether the stored path uses the relative marker.
    #[serde(default)]
    pub is_relative: bool,
    /// Image name inside the document.
    pub name: String,
    /// Embedded in the document; no external file dependency.
    #[serde(default)]
    pub packed: bool,
    /// Absolute path as resolved by the engine.
    #[serde(default)]
    pub resolved: Option<String>,
    /// Pixel dimensions.
    #[serde(default)]
    pub size: Option<[u32; 2]>,
    /// Number of users.
    #[serde(default)]
    pub users: u32,
}

/// A library entry of a `scan_references` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryEntry {
    /// Collections linked from the library.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Whether the resolved file existed when the engine looked.
    #[serde(default)]
    pub exists: bool,
    /// Stored path.
    #[serde(default)]
    pub filepath: String,
    /// Whether the stored path uses the relative marker.
    #[serde(default)]
    pub is_relative: bool,
    /// Library name inside the document.
    pub name: String,
    /// Objects linked from the library.
    #[serde(default)]
    pub objects: Vec<String>,
    /// Absolute path as resolved by the engine.
    #[serde(default)]
    pub resolved: Option<String>,
}

/// Point a document's link to a missing named item at another item of the same library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameRemap {
    /// Library path as stored in the document.
    pub library_filepath: String,
    /// Library name inside the document.
    pub library_name: String,
    /// Item to link instead.
    pub new_collection_name: String,
    /// Missing item name.
    pub old_collection_name: String,
}

/// Response to `fix_collection_names`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct NamesRemapped {
    /// Remaps the engine could not apply.
    #[serde(default)]
    pub failed_remappings: Vec<FailedNameRemap>,
    /// Remaps applied and saved.
    #[serde(default)]
    pub total_remapped: usize,
}

/// Response to `rebase_blend_paths`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Rebased {
    /// Image paths rewritten (or that would be, in a dry run).
    #[serde(default)]
    pub rebased_images: Vec<RebasedPath>,
    /// Library paths rewritten (or that would be, in a dry run).
    #[serde(default)]
    pub rebased_libraries: Vec<RebasedPath>,
    /// References left alone because their target moves along.
    #[serde(default)]
    pub skipped: Vec<SkippedRebase>,
}

/// One rebased stored path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RebasedPath {
    /// Image or library name.
    pub name: String,
    /// Stored path after the rebase.
    pub new_path: String,
    /// Stored path before the rebase.
    pub old_path: String,
}

/// Response to `move_scene`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Relocated {
    /// Whether the document was written at its new location.
    #[serde(default)]
    pub file_moved: bool,
    /// Whether the old copy was deleted.
    #[serde(default)]
    pub old_deleted: bool,
    /// Internal references rebased for the new location.
    #[serde(flatten)]
    pub rebased: Rebased,
}

/// Response to `relink_paths`.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Relinked {
    /// Library paths rewritten.
    #[serde(default)]
    pub relinked_libraries: usize,
    /// Image paths rewritten.
    #[serde(default)]
    pub relinked_textures: usize,
    /// Total paths rewritten.
    #[serde(default)]
    pub total_relinked: usize,
}

/// A request to the Document Engine, one variant per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Rewrite stored paths by exact old stored path, then save.
    ApplyRemap {
        /// Document to rewrite.
        document: PathBuf,
        /// Old stored path to new stored path.
        remap: BTreeMap<String, String>,
    },
    /// List the scenes of a document.
    ListScenes {
        /// Document to inspect.
        document: PathBuf,
    },
    /// Rebase a document's relative references after it moved from `old_dir` to `new_dir`.
    RebaseInternal {
        /// Document at its current location.
        document: PathBuf,
        /// Compute only; do not save.
        dry_run: bool,
        /// Old absolute paths of every file moving in the same operation.
        moved_files: Vec<PathBuf>,
        /// Directory the document is considered to be in now.
        new_dir: PathBuf,
        /// Directory the document's references were written against.
        old_dir: PathBuf,
    },
    /// Save a document at a new location with rebased references.
    Relocate {
        /// Delete the old copy once the new one is saved.
        delete_old: bool,
        /// Compute only; do not write anything.
        dry_run: bool,
        /// Destination path.
        new_path: PathBuf,
        /// Current path.
        old_path: PathBuf,
    },
    /// Relink missing named library items to replacements, then save.
    RemapNames {
        /// Document to rewrite.
        document: PathBuf,
        /// One entry per missing item.
        remappings: Vec<NameRemap>,
    },
    /// Enumerate a document's outbound references.
    ScanReferences {
        /// Document to inspect.
        document: PathBuf,
    },
    /// Point every reference resolving to `old_path` at `new_path`, then save.
    UpdatePaths {
        /// Document to rewrite.
        document: PathBuf,
        /// Absolute path of the file's new location.
        new_path: PathBuf,
        /// Absolute path of the file's old location.
        old_path: PathBuf,
    },
    /// Find named library items the document expects but its libraries lack.
    ValidateNames {
        /// Document to inspect.
        document: PathBuf,
    },
}

impl Request {
    /// `--key value` arguments passed after the `--` separator.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if a remap table cannot be serialized.
    pub fn arguments(&self) -> Result<Vec<(&'static str, String)>, Error> {
        return Ok(match self {
            Self::ApplyRemap { document, remap } => vec![
                ("blend-file", display(document)),
                ("relink-map", serde_json::to_string(remap)?),
            ],
            Self::ListScenes { document } | Self::ScanReferences { document } | Self::ValidateNames { document } => {
                vec![("blend-file", display(document))]
            },
            Self::RebaseInternal { document, dry_run, moved_files, new_dir, old_dir } => vec![
                ("blend-file", display(document)),
                ("old-dir", display(old_dir)),
                ("new-dir", display(new_dir)),
                ("moved-files", moved_files.iter().map(|p| return display(p)).collect::<Vec<_>>().join(",")),
                ("dry-run", dry_run.to_string()),
            ],
            Self::Relocate { delete_old, dry_run, new_path, old_path } => vec![
                ("old-scene", display(old_path)),
                ("new-scene", display(new_path)),
                ("delete-old", delete_old.to_string()),
                ("dry-run", dry_run.to_string()),
            ],
            Self::RemapNames { document, remappings } => vec![
                ("blend-file", display(document)),
                ("remappings", serde_json::to_string(remappings)?),
            ],
            Self::UpdatePaths { document, new_path, old_path } => vec![
                ("blend-file", display(document)),
                ("old-path", display(old_path)),
                ("new-path", display(new_path)),
            ],
        });
    }

    /// Time budget when no override is configured: single-document reads are
    /// quick, rewrites take longer, relocation and batch validation longest.
    pub const fn default_timeout(&self) -> Duration {
        let seconds = match self {
            Self::ListScenes { .. } | Self::ScanReferences { .. } => 60,
            Self::ApplyRemap { .. }
            | Self::RebaseInternal { .. }
            | Self::RemapNames { .. }
            | Self::UpdatePaths { .. } => 120,
            Self::Relocate { .. } => 180,
            Self::ValidateNames { .. } => 300,
        };
        return Duration::from_secs(seconds);
    }

    /// The document the request acts on, for diagnostics.
    pub fn document(&self) -> &Path {
        return match self {
            Self::ApplyRemap { document, .. }
            | Self::ListScenes { document }
            | Self::RebaseInternal { document, .. }
            | Self::RemapNames { document, .. }
            | Self::ScanReferences { document }
            | Self::UpdatePaths { document, .. }
            | Self::ValidateNames { document } => document,
            Self::Relocate { old_path, .. } => old_path,
        };
    }

    /// Operation name; also the script's file stem.
    pub const fn operation(&self) -> &'static str {
        return match self {
            Self::ApplyRemap { .. } => "relink_paths",
            Self::ListScenes { .. } => "list_scenes",
            Self::RebaseInternal { .. } => "rebase_blend_paths",
            Self::Relocate { .. } => "move_scene",
            Self::RemapNames { .. } => "fix_collection_names",
            Self::ScanReferences { .. } => "scan_references",
            Self::UpdatePaths { .. } => "update_blend_paths",
            Self::ValidateNames { .. } => "validate_collection_names",
        };
    }
}

/// A scene inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct SceneEntry {
    /// Whether this is the document's active scene.
    #[serde(default)]
    pub is_active: bool,
    /// Scene name.
    pub name: String,
}

/// Response to `list_scenes`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Scenes {
    /// Scenes in document order.
    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

/// Response to `scan_references`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Scanned {
    /// Image entries.
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    /// Library entries.
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
}

/// Response to `update_blend_paths`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Updated {
    /// Individual rewrites.
    #[serde(default)]
    pub changes: Vec<UpdatedPath>,
    /// Number of rewrites.
    #[serde(default)]
    pub changes_count: usize,
}

/// One stored path rewritten by `update_blend_paths`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedPath {
    /// Image or library.
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    /// Image or library name.
    pub name: String,
    /// Stored path after the rewrite.
    pub new: String,
    /// Stored path before the rewrite.
    pub old: String,
}

/// Lossy display string of a path.
fn display(path: &Path) -> String {
    return path.to_string_lossy().into_owned();
}

/// Messages from `LOG:` lines, in order.
pub fn log_lines(stdout: &str) -> Vec<&str> {
    return stdout
        .lines()
        .filter_map(|line| return line.strip_prefix(LOG_PREFIX))
        .map(str::trim)
        .filter(|msg| return !msg.is_empty())
        .collect();
}

/// Locate the marker and parse the first JSON value after it, ignoring trailing text.
///
/// # Errors
///
/// Returns `Error::MalformedResponse` if the marker is missing, nothing
/// follows it, or the value is not a valid envelope for `T`.
pub fn parse_response<T: DeserializeOwned>(operation: &str, stdout: &str) -> Result<Envelope<T>, Error> {
    let malformed = |reason: String| {
        return Error::MalformedResponse { operation: operation.to_string(), reason };
    };

    let start = stdout
        .find(RESPONSE_MARKER)
        .ok_or_else(|| return malformed(format!("no {RESPONSE_MARKER} marker in output")))?;
    let rest = stdout.get(start.saturating_add(RESPONSE_MARKER.len())..).unwrap_or_default();

    let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Envelope<T>>();
    return match values.next() {
        Some(Ok(envelope)) => Ok(envelope),
        Some(Err(e)) => Err(malformed(e.to_string())),
        None => Err(malformed(format!("nothing after {RESPONSE_MARKER}"))),
    };
}
