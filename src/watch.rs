//! Watch mode: runs `check` on startup, then re-runs when project files change.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use blendref::error::Error;
use blendref::scanner::{FileKind, ScanRules};
use notify::{RecursiveMode, Watcher as _};

use crate::commands::{self, Format, Workspace};
use crate::diagnostics;

/// Debounce delay between filesystem events and re-check.
const DEBOUNCE_MS: u64 = 100;

/// Create a filesystem watcher that sends the touched paths of relevant events on the given channel.
///
/// # Errors
///
/// Returns an error if the watcher cannot be created.
fn create_watcher(tx: crossbeam_channel::Sender<Vec<PathBuf>>) -> Result<notify::RecommendedWatcher, Error> {
    return notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        if let Ok(event) = res
            && matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
            )
        {
            let _ = tx.send(event.paths);
        }
    })
    .map_err(|e| {
        return Error::validation(format!("watcher setup failed: {e}"));
    });
}

/// Whether a change to `path` can affect the broken link report: a document,
/// asset or directory outside every pruned directory.
fn is_relevant(path: &Path, root: &Path, rules: &ScanRules) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        let name = component.as_os_str().to_string_lossy();
        if components.peek().is_some() && rules.is_ignored_dir(&name) {
            return false;
        }
    }
    return match rules.classify(path) {
        FileKind::Asset | FileKind::Document => true,
        FileKind::Backup => false,
        FileKind::Other => path.extension().is_none(),
    };
}

/// Entry point for the watch command.
///
/// Runs an initial check, then watches the project tree and re-checks on relevant changes.
///
/// # Errors
///
/// Returns errors from watcher setup.
pub fn run(workspace: &Workspace, format: Format) -> Result<ExitCode, Error> {
    let root = workspace.root();
    let rules = workspace.rules();

    eprintln!("watch: initial check");
    let mut last_code = run_check(workspace, format);

    let (tx, rx) = crossbeam_channel::unbounded();
    let mut watcher = create_watcher(tx)?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| return Error::validation(format!("cannot watch {}: {e}", root.display())))?;

    eprintln!("watch: monitoring {}, press Ctrl+C to stop", root.display());

    while let Ok(paths) = rx.recv() {
        let mut relevant = paths.iter().any(|p| return is_relevant(p, root, rules));
        let debounce = Duration::from_millis(DEBOUNCE_MS);
        while let Ok(more) = rx.recv_timeout(debounce) {
            relevant = relevant || more.iter().any(|p| return is_relevant(p, root, rules));
        }
        if !relevant {
            continue;
        }
        eprintln!("watch: change detected, re-checking...");
        last_code = run_check(workspace, format);
    }

    return Ok(last_code);
}

/// Run check once and print result. Returns the exit code from check.
fn run_check(workspace: &Workspace, format: Format) -> ExitCode {
    return match commands::check(workspace, format) {
        Ok(code) => code,
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::from(3_u8)
        },
    };
}
