use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use blendref::error::Error;
use blendref::references::ReferenceSweep;
use blendref::relink::{RelinkPlan, Resolution};
use blendref::scanner::BackupCleanup;
use blendref::similarity::Candidates;
use blendref::types::{BrokenLinkReport, ChangeStatus, OperationPreview, OperationResult, RollbackStatus};

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Print markdown to stderr with headings in bold.
pub fn print_markdown(md: &str) {
    for line in md.lines() {
        if line.starts_with('#') {
            eprintln!("{BOLD}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
}

/// Render an error as valid markdown with bold headings and print to stderr.
pub fn print_error(e: &Error) {
    print_markdown(&render_error(e));
}

/// Percentage for a `[0, 1]` ratio.
fn percent(ratio: f64) -> String {
    return format!("{:.0}%", ratio * 100.0);
}

/// Render candidate files for a missing filename.
pub fn render_candidates(name: &str, candidates: &Candidates) -> String {
    let mut out = format!("# Candidates for `{name}`\n\n");
    match candidates {
        Candidates::Exact(found) => {
            out.push_str("## Exact matches\n\n");
            for path in found {
                let _ = writeln!(out, "- `{}`", path.display());
            }
        },
        Candidates::Fuzzy(matches) => {
            out.push_str("## Similar files\n\n");
            for m in matches {
                let _ = writeln!(out, "- `{}` ({})", m.candidate.display(), percent(m.ratio));
            }
        },
        Candidates::None => out.push_str("No file is similar enough.\n"),
    }
    return out;
}

/// Render the outcome of a backup cleanup.
pub fn render_cleanup(cleanup: &BackupCleanup) -> String {
    let mut out = String::new();
    for path in &cleanup.removed {
        let _ = writeln!(out, "- removed `{}`", relative(path));
    }
    if !cleanup.failed.is_empty() {
        out.push_str("\n## Not removed\n\n");
        for (path, reason) in &cleanup.failed {
            let _ = writeln!(out, "- `{}`: {reason}", relative(path));
        }
    }
    let kibibytes = u32::try_from(cleanup.bytes_freed / 1024).map_or(f64::from(u32::MAX), f64::from);
    let megabytes = kibibytes / 1024.0;
    let _ = writeln!(
        out,
        "\n{} backup file(s) removed, {megabytes:.2} MB freed",
        cleanup.removed.len()
    );
    return out;
}

/// Render an error as a structured markdown diagnostic: what happened, and how to fix it where there is a fix.
pub fn render_error(e: &Error) -> String {
    return match e {
        Error::EngineFailure { document, errors, operation } => {
            let mut out = format!("# Error: Document Engine Refused\n\n`{operation}` failed for `{}`.\n\n", document.display());
            for message in errors {
                let _ = writeln!(out, "- {message}");
            }
            out
        },
        Error::EngineTimeout { operation, seconds } => format!(
            "\
# Error: Document Engine Timed Out

`{operation}` did not answer within {seconds}s.

## Fix

Raise the limit in `.blendref.toml`:

    [engine]
    timeout_secs = 600
"
        ),
        Error::EngineUnavailable { path, reason } => format!(
            "\
# Error: Document Engine Unavailable

`{}`: {reason}

## Fix

Point `[engine] executable` and `scripts_dir` in `.blendref.toml` at a working
installation, or pass `--engine <path>`.
",
            path.display()
        ),
        Error::RollbackFailed { original, rollback } => format!(
            "\
# Error: Rollback Failed

The move failed: {original}

Undoing it failed too: {rollback}

## Fix

The project may be inconsistent. Check both locations by hand, then run:

    blendref check
"
        ),
        Error::TomlDe(err) => format!("# Error: Invalid TOML\n\n{err}\n"),
        Error::Validation { reason } => format!("# Error: Invalid Request\n\n{reason}\n"),
        Error::Io(_)
        | Error::Json(_)
        | Error::MalformedResponse { .. }
        | Error::ScanFailure { .. }
        | Error::VerificationFailed { .. } => format!("# Error\n\n{e}\n"),
    };
}

/// Render missing named items with the replacement each would get.
pub fn render_name_plan(report: &BrokenLinkReport, renames: &BTreeMap<String, String>) -> String {
    let mut out = String::from("# Unresolved Names\n\n");
    for file in &report.files {
        for name in &file.unresolved_names {
            let _ = write!(
                out,
                "- `{}` in `{}` (`{}`)",
                name.item_name,
                name.library_name,
                relative(&file.document)
            );
            match renames.get(&name.item_name) {
                Some(new_name) => {
                    let _ = writeln!(out, " -> `{new_name}`");
                },
                None => out.push_str(": no suggestion, choose one with `--rename`\n"),
            }
            for suggestion in &name.suggestions {
                let _ = writeln!(out, "  - `{}` ({})", suggestion.name, percent(suggestion.ratio));
            }
        }
    }
    out.push('\n');
    return out;
}

/// Render a move preview.
pub fn render_preview(preview: &OperationPreview) -> String {
    let mut out = format!("# {}\n\n", preview.operation_name);

    if !preview.changes.is_empty() {
        out.push_str("## Changes\n\n");
        for change in &preview.changes {
            let marker = match change.status {
                ChangeStatus::Error => "ERROR",
                ChangeStatus::Ok => "ok",
                ChangeStatus::Warning => "warn",
            };
            let kind = serde_json::to_value(change.item_kind)
                .ok()
                .and_then(|v| return v.as_str().map(str::to_string))
                .unwrap_or_default();
            if change.status == ChangeStatus::Error {
                let _ = writeln!(out, "- [{marker}] `{}`: {}", change.document.display(), change.item_name);
            } else {
                let _ = writeln!(
                    out,
                    "- [{marker}] {kind} `{}` in `{}`: `{}` -> `{}`",
                    change.item_name,
                    relative(&change.document),
                    change.old_path,
                    change.new_path
                );
            }
        }
        out.push('\n');
    }

    if !preview.skipped.is_empty() {
        out.push_str("## Skipped\n\n");
        for skip in &preview.skipped {
            let _ = writeln!(out, "- `{}` `{}`: {}", skip.name, skip.stored_path, skip.reason);
        }
        out.push('\n');
    }
    render_messages(&mut out, "Warnings", &preview.warnings);
    render_messages(&mut out, "Errors", &preview.errors);

    let _ = writeln!(
        out,
        "{} change(s), {} document(s) affected{}",
        preview.total_changes(),
        preview.affected_documents().len(),
        if preview.is_valid() { "" } else { ", operation is invalid" }
    );
    return out;
}

/// Render the documents referencing `target`.
pub fn render_referrers(target: &Path, found: &ReferenceSweep) -> String {
    let mut out = format!("# References to `{}`\n\n", relative(target));
    for (document, refs) in &found.hits {
        let _ = writeln!(out, "## `{}`\n", relative(document));
        for reference in refs {
            let _ = writeln!(out, "- {:?} `{}`: `{}`", reference.kind, reference.name, reference.stored_path);
        }
        out.push('\n');
    }
    if !found.failures.is_empty() {
        out.push_str("## Scan failures\n\n");
        for failure in &found.failures {
            let _ = writeln!(out, "- `{}`: {}", relative(&failure.document), failure.reason);
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{} reference(s) in {} document(s), {} scan failure(s)",
        found.total_references(),
        found.hits.len(),
        found.failures.len()
    );
    return out;
}

/// Render a broken link report.
pub fn render_report(report: &BrokenLinkReport) -> String {
    let mut out = String::new();
    if report.is_clean() {
        let _ = writeln!(out, "All {} document(s) clean", report.files_checked);
        return out;
    }

    out.push_str("# Broken Links\n\n");
    for file in &report.files {
        let _ = writeln!(out, "## `{}`\n", relative(&file.document));
        for reference in &file.broken {
            let _ = writeln!(
                out,
                "- BROKEN {:?} `{}`: `{}` -> `{}`",
                reference.kind,
                reference.name,
                reference.stored_path,
                reference.resolved_path.display()
            );
        }
        for unresolved in &file.unresolved_names {
            let _ = write!(
                out,
                "- MISSING `{}` in library `{}` (`{}`)",
                unresolved.item_name, unresolved.library_name, unresolved.library_path
            );
            if let Some(best) = unresolved.suggestions.first() {
                let _ = write!(out, ", did you mean `{}` ({})?", best.name, percent(best.ratio));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if !report.failures.is_empty() {
        out.push_str("## Scan failures\n\n");
        for failure in &report.failures {
            let _ = writeln!(out, "- `{}`: {}", relative(&failure.document), failure.reason);
        }
        out.push('\n');
    }
    render_messages(&mut out, "Warnings", &report.warnings);

    let _ = writeln!(
        out,
        "{} document(s) checked: {} broken, {} unresolved name(s), {} scan failure(s)",
        report.files_checked,
        report.total_broken(),
        report.total_unresolved_names(),
        report.failures.len()
    );
    return out;
}

/// Render a relink plan.
pub fn render_relink_plan(plan: &RelinkPlan) -> String {
    let mut out = String::from("# Relink Plan\n\n");
    for entry in &plan.entries {
        match &entry.resolution {
            Resolution::Auto { target } => {
                let _ = writeln!(out, "- `{}` -> `{}`", entry.filename, target.display());
            },
            Resolution::Choose { matches } => {
                let _ = writeln!(out, "- `{}`: choose one with `--map`", entry.filename);
                for m in matches {
                    let _ = writeln!(out, "  - `{}` ({})", m.candidate.display(), percent(m.ratio));
                }
            },
            Resolution::NoCandidate => {
                let _ = writeln!(out, "- `{}`: no candidate", entry.filename);
            },
        }
    }
    out.push('\n');
    render_messages(&mut out, "Warnings", &plan.warnings);
    return out;
}

/// Render the outcome of an execute call.
pub fn render_result(result: &OperationResult) -> String {
    let heading = if result.success { "Done" } else { "Failed" };
    let mut out = format!("# {heading}\n\n{}\n\n{} change(s) made\n", result.message, result.changes_made);
    match &result.rollback {
        RollbackStatus::Completed => out.push_str("\nRolled back to the original location.\n"),
        RollbackStatus::Failed(reason) => {
            let _ = writeln!(out, "\n## Rollback failed\n\n{reason}\n\nThe project may be inconsistent.");
        },
        RollbackStatus::NotAttempted => {},
    }
    out.push('\n');
    render_messages(&mut out, "Errors", &result.errors);
    return out;
}

/// Append a titled bullet list when `messages` is not empty.
fn render_messages(out: &mut String, title: &str, messages: &[String]) {
    if messages.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {title}\n");
    for message in messages {
        let _ = writeln!(out, "- {message}");
    }
    out.push('\n');
}

/// A path relative to the working directory when it lies beneath it.
fn relative(path: &Path) -> String {
    let Ok(cwd) = std::env::current_dir() else {
        return path.display().to_string();
    };
    return path.strip_prefix(&cwd).unwrap_or(path).display().to_string();
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use blendref::types::{ChangeKind, PathChange};

    use super::*;

    #[test]
    fn preview_lists_errors_and_validity() {
        let mut preview = OperationPreview::new("Move a.png -> b.png");
        preview.changes.push(PathChange {
            document: PathBuf::from("/p/s.blend"),
            item_kind: ChangeKind::ScanError,
            item_name: "Scan error: timed out".to_string(),
            new_path: String::new(),
            old_path: String::new(),
            status: ChangeStatus::Error,
        });
        preview.errors.push("destination already exists".to_string());

        let md = render_preview(&preview);
        assert!(md.starts_with("# Move a.png -> b.png"));
        assert!(md.contains("[ERROR]"));
        assert!(md.contains("## Errors"));
        assert!(md.contains("operation is invalid"));
    }

    #[test]
    fn cleanup_reports_failures_and_space() {
        let cleanup = BackupCleanup {
            bytes_freed: 3 * 1024 * 1024,
            failed: vec![(PathBuf::from("/p/locked.blend1"), "permission denied".to_string())],
            removed: vec![PathBuf::from("/p/a.blend1")],
        };
        let md = render_cleanup(&cleanup);
        assert!(md.contains("## Not removed"));
        assert!(md.contains("permission denied"));
        assert!(md.contains("1 backup file(s) removed, 3.00 MB freed"));
    }

    #[test]
    fn referrers_list_scan_failures() {
        let found = ReferenceSweep {
            failures: vec![blendref::types::DocumentFailure {
                document: PathBuf::from("/p/broken.blend"),
                reason: "file is corrupt".to_string(),
            }],
            hits: BTreeMap::new(),
        };
        let md = render_referrers(Path::new("/p/wood.png"), &found);
        assert!(md.contains("## Scan failures"));
        assert!(md.contains("file is corrupt"));
        assert!(md.contains("0 reference(s) in 0 document(s), 1 scan failure(s)"));
    }

    #[test]
    fn clean_report_is_one_line() {
        let report = BrokenLinkReport { files_checked: 3, ..BrokenLinkReport::default() };
        assert_eq!(render_report(&report), "All 3 document(s) clean\n");
    }

    #[test]
    fn rollback_failure_is_called_out() {
        let result = OperationResult {
            changes_made: 1,
            errors: vec!["engine timed out".to_string()],
            message: "failed".to_string(),
            rollback: RollbackStatus::Failed("old path occupied".to_string()),
            success: false,
        };
        let md = render_result(&result);
        assert!(md.contains("## Rollback failed"));
        assert!(md.contains("old path occupied"));
    }

    #[test]
    fn timeout_suggests_config_fix() {
        let md = render_error(&Error::EngineTimeout {
            operation: "scan_references".to_string(),
            seconds: 60,
        });
        assert!(md.contains("timeout_secs"));
    }
}
