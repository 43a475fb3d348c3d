//! Candidate search for missing files and missing library items.
//!
//! Exact filename matches win outright. Otherwise candidates sharing the
//! missing file's extension are ranked by a sequence-matching ratio of their
//! stems, the same `2 * matches / total` figure a human reads as a percentage.

use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::error::Error;
use crate::scanner::{self, ScanRules};
use crate::types::{NameSuggestion, SimilarityMatch};

/// Outcome of a candidate search for one missing file.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    /// Files with exactly the missing name, in traversal order.
    Exact(Vec<PathBuf>),
    /// Similar files, best first.
    Fuzzy(Vec<SimilarityMatch>),
    /// Nothing cleared the threshold.
    None,
}

/// Fuzzy matching knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Upper bound on returned matches.
    pub max_matches: usize,
    /// Minimum ratio a candidate must reach.
    pub threshold: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        return Self {
            max_matches: Self::DEFAULT_MAX_MATCHES,
            threshold: Self::DEFAULT_THRESHOLD,
        };
    }
}

impl MatchOptions {
    /// Default cap on returned matches.
    pub const DEFAULT_MAX_MATCHES: usize = 5;
    /// Default minimum ratio.
    pub const DEFAULT_THRESHOLD: f64 = 0.6;
}

/// Exact first, then fuzzy: the full candidate search for a missing file.
///
/// `missing` may be a bare filename or a path; only its final component is used.
///
/// # Errors
///
/// Returns `Error::Validation` if `missing` has no filename.
pub fn find_candidates(
    missing: &str,
    root: &Path,
    rules: &ScanRules,
    options: MatchOptions,
) -> Result<Candidates, Error> {
    let name = file_name_of(missing).ok_or_else(|| return Error::validation("search text is empty"))?;

    let exact = find_exact(&name, root, rules);
    if !exact.is_empty() {
        return Ok(Candidates::Exact(exact));
    }

    let fuzzy = find_similar(&name, root, rules, options);
    if fuzzy.is_empty() {
        return Ok(Candidates::None);
    }
    return Ok(Candidates::Fuzzy(fuzzy));
}

/// Files under `root` whose name equals `name`, case-sensitively.
pub fn find_exact(name: &str, root: &Path, rules: &ScanRules) -> Vec<PathBuf> {
    return scanner::walk_files(root, rules)
        .into_iter()
        .filter(|p| return p.file_name().is_some_and(|n| return n == name))
        .collect();
}

/// Files under `root` with the same extension as `name` whose stem is similar to its stem.
/// Sorted by descending ratio; ties keep traversal order.
pub fn find_similar(name: &str, root: &Path, rules: &ScanRules, options: MatchOptions) -> Vec<SimilarityMatch> {
    let wanted = Path::new(name);
    let wanted_ext = lowercase_extension(wanted);
    let wanted_stem = stem_of(wanted);

    let mut matches: Vec<SimilarityMatch> = scanner::walk_files(root, rules)
        .into_iter()
        .filter(|p| return lowercase_extension(p) == wanted_ext)
        .filter_map(|candidate| {
            let ratio = similarity(&wanted_stem, &stem_of(&candidate));
            return (ratio >= options.threshold).then_some(SimilarityMatch { candidate, ratio });
        })
        .collect();

    matches.sort_by(|a, b| return b.ratio.total_cmp(&a.ratio));
    matches.truncate(options.max_matches);
    return matches;
}

/// Final path component of a search text, if it has a non-blank one.
fn file_name_of(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = crate::paths::normalize_separators(trimmed);
    let name = normalized.rsplit('/').next()?;
    if name.is_empty() {
        return None;
    }
    return Some(name.to_string());
}

/// Extension in lowercase, empty when there is none.
fn lowercase_extension(path: &Path) -> String {
    return path
        .extension()
        .map(|e| return e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
}

/// Rank the names a library does provide against one it no longer does.
pub fn rank_names(missing: &str, available: &[String], options: MatchOptions) -> Vec<NameSuggestion> {
    let mut ranked: Vec<NameSuggestion> = available
        .iter()
        .filter_map(|name| {
            let ratio = similarity(missing, name);
            return (ratio >= options.threshold).then(|| return NameSuggestion { name: name.clone(), ratio });
        })
        .collect();
    ranked.sort_by(|a, b| return b.ratio.total_cmp(&a.ratio));
    ranked.truncate(options.max_matches);
    return ranked;
}

/// Case-insensitive sequence-matching ratio in `[0, 1]`. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 1.0;
    }
    return f64::from(TextDiff::from_chars(a.as_str(), b.as_str()).ratio());
}

/// File stem as a string, empty when there is none.
fn stem_of(path: &Path) -> String {
    return path
        .file_stem()
        .map(|s| return s.to_string_lossy().into_owned())
        .unwrap_or_default();
}
