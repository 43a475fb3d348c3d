//! The Document Engine port and its subprocess adapter.
//!
//! Core logic talks to documents only through [`DocumentEngine`], so it can be
//! driven by an in-memory fake as easily as by the real host process.

use std::collections::BTreeMap;
use std::io::{BufRead as _, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use crate::config::EngineSettings;
use crate::error::Error;
use crate::protocol::{
    self, BrokenNames, Envelope, NameRemap, NamesRemapped, Rebased, Relinked, Relocated, Request, Scanned, Scenes,
    Updated,
};
use crate::scanner::{self, ScanRules};

/// Operations the core needs from whatever reads and writes documents.
///
/// Every method returns the full envelope: `Err` means the engine could not be
/// asked or did not answer, while `success: false` inside `Ok` means it
/// answered and refused.
pub trait DocumentEngine {
    /// Rewrite stored paths matching the keys of `remap` to its values, then save.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn apply_remap(&self, document: &Path, remap: &BTreeMap<String, String>) -> Result<Envelope<Relinked>, Error>;

    /// Enumerate the images and libraries a document references.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn extract_references(&self, document: &Path) -> Result<Envelope<Scanned>, Error>;

    /// List the scenes of a document.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn list_scenes(&self, document: &Path) -> Result<Envelope<Scenes>, Error>;

    /// Rebase a document's relative references from `old_dir` to `new_dir`,
    /// leaving references into `moved_files` alone.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn rebase_internal(
        &self,
        document: &Path,
        old_dir: &Path,
        new_dir: &Path,
        moved_files: &[PathBuf],
        dry_run: bool,
    ) -> Result<Envelope<Rebased>, Error>;

    /// Save a document at `new_path` with its references rebased, optionally deleting the old copy.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn relocate(
        &self,
        old_path: &Path,
        new_path: &Path,
        delete_old: bool,
        dry_run: bool,
    ) -> Result<Envelope<Relocated>, Error>;

    /// Link each remap's replacement item in place of its missing one, then save.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn remap_names(&self, document: &Path, remappings: &[NameRemap]) -> Result<Envelope<NamesRemapped>, Error>;

    /// Point every reference in `document` that resolves to `old_path` at `new_path`, then save.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn update_paths(&self, document: &Path, old_path: &Path, new_path: &Path) -> Result<Envelope<Updated>, Error>;

    /// Find named library items the document expects but its libraries lack.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the engine cannot be reached or answers malformed output.
    fn validate_names(&self, document: &Path) -> Result<Envelope<BrokenNames>, Error>;
}

/// A document engine bound to a project tree and its traversal rules.
#[derive(Clone, Copy)]
pub struct Project<'a> {
    /// Reads and writes documents.
    pub engine: &'a dyn DocumentEngine,
    /// Project root.
    pub root: &'a Path,
    /// Which files count as documents and assets, and which directories are pruned.
    pub rules: &'a ScanRules,
}

impl Project<'_> {
    /// Every container document under the root.
    pub fn documents(&self) -> Vec<PathBuf> {
        return scanner::find_documents(self.root, self.rules);
    }
}

/// A line or end-of-stream from one of the child's output pipes.
enum PipeMessage {
    /// The stream reached end of file.
    Closed,
    /// A stderr line.
    Stderr(String),
    /// A stdout line.
    Stdout(String),
}

/// Runs each operation as `<executable> --background --python <script> -- --key value ...`.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    /// Host executable.
    executable: PathBuf,
    /// Directory holding `<operation>.py` scripts.
    scripts_dir: PathBuf,
    /// Replaces every per-operation default when set.
    timeout: Option<Duration>,
}

impl ProcessEngine {
    /// Send a request and parse its response.
    ///
    /// # Errors
    ///
    /// Returns `Error::EngineUnavailable` if the script is missing or the
    /// process cannot start, `Error::EngineTimeout` if it does not finish in
    /// time, or `Error::MalformedResponse` if its output carries no envelope.
    fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<Envelope<T>, Error> {
        let operation = request.operation();
        let script = self.scripts_dir.join(format!("{operation}.py"));
        if !script.is_file() {
            return Err(Error::EngineUnavailable {
                path: script,
                reason: "operation script not found".to_string(),
            });
        }

        let mut command = Command::new(&self.executable);
        command.arg("--background").arg("--python").arg(&script).arg("--");
        for (key, value) in request.arguments()? {
            command.arg(format!("--{key}")).arg(value);
        }
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        tracing::debug!(operation, document = %request.document().display(), "invoking document engine");
        let mut child = command.spawn().map_err(|e| {
            return Error::EngineUnavailable {
                path: self.executable.clone(),
                reason: e.to_string(),
            };
        })?;

        let timeout = self.timeout.unwrap_or_else(|| return request.default_timeout());
        let stdout = collect_output(&mut child, operation, timeout)?;

        // Exit status is informational: the host may exit non-zero after a successful run.
        match child.wait() {
            Ok(status) => tracing::debug!(operation, %status, "document engine exited"),
            Err(e) => tracing::debug!(operation, error = %e, "could not reap document engine"),
        }

        return protocol::parse_response(operation, &stdout);
    }

    /// Adapter for the configured executable and scripts.
    pub fn new(settings: &EngineSettings) -> Self {
        return Self {
            executable: settings.executable.clone(),
            scripts_dir: settings.scripts_dir.clone(),
            timeout: settings.timeout,
        };
    }
}

impl DocumentEngine for ProcessEngine {
    fn apply_remap(&self, document: &Path, remap: &BTreeMap<String, String>) -> Result<Envelope<Relinked>, Error> {
        return self.call(&Request::ApplyRemap {
            document: document.to_path_buf(),
            remap: remap.clone(),
        });
    }

    fn extract_references(&self, document: &Path) -> Result<Envelope<Scanned>, Error> {
        return self.call(&Request::ScanReferences { document: document.to_path_buf() });
    }

    fn list_scenes(&self, document: &Path) -> Result<Envelope<Scenes>, Error> {
        return self.call(&Request::ListScenes { document: document.to_path_buf() });
    }

    fn rebase_internal(
        &self,
        document: &Path,
        old_dir: &Path,
        new_dir: &Path,
        moved_files: &[PathBuf],
        dry_run: bool,
    ) -> Result<Envelope<Rebased>, Error> {
        return self.call(&Request::RebaseInternal {
            document: document.to_path_buf(),
            dry_run,
            moved_files: moved_files.to_vec(),
            new_dir: new_dir.to_path_buf(),
            old_dir: old_dir.to_path_buf(),
        });
    }

    fn relocate(
        &self,
        old_path: &Path,
        new_path: &Path,
        delete_old: bool,
        dry_run: bool,
    ) -> Result<Envelope<Relocated>, Error> {
        return self.call(&Request::Relocate {
            delete_old,
            dry_run,
            new_path: new_path.to_path_buf(),
            old_path: old_path.to_path_buf(),
        });
    }

    fn remap_names(&self, document: &Path, remappings: &[NameRemap]) -> Result<Envelope<NamesRemapped>, Error> {
        return self.call(&Request::RemapNames {
            document: document.to_path_buf(),
            remappings: remappings.to_vec(),
        });
    }

    fn update_paths(&self, document: &Path, old_path: &Path, new_path: &Path) -> Result<Envelope<Updated>, Error> {
        return self.call(&Request::UpdatePaths {
            document: document.to_path_buf(),
            new_path: new_path.to_path_buf(),
            old_path: old_path.to_path_buf(),
        });
    }

    fn validate_names(&self, document: &Path) -> Result<Envelope<BrokenNames>, Error> {
        return self.call(&Request::ValidateNames { document: document.to_path_buf() });
    }
}

/// Drain the child's stdout and stderr on worker threads until both close,
/// forwarding `LOG:` lines as they arrive. Kills the child on timeout.
///
/// # Errors
///
/// Returns `Error::EngineTimeout` if the streams stay open past `timeout`.
fn collect_output(child: &mut Child, operation: &str, timeout: Duration) -> Result<String, Error> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut open_streams = 0_u8;
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone(), PipeMessage::Stdout);
        open_streams = open_streams.saturating_add(1);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx, PipeMessage::Stderr);
        open_streams = open_streams.saturating_add(1);
    }

    let deadline = Instant::now().checked_add(timeout);
    let mut stdout = String::new();
    while open_streams > 0 {
        let remaining = deadline.map_or(timeout, |d| return d.saturating_duration_since(Instant::now()));
        match rx.recv_timeout(remaining) {
            Ok(PipeMessage::Closed) => open_streams = open_streams.saturating_sub(1),
            Ok(PipeMessage::Stderr(line)) => tracing::trace!(operation, stderr = %line),
            Ok(PipeMessage::Stdout(line)) => {
                for message in protocol::log_lines(&line) {
                    tracing::debug!(operation, "{message}");
                }
                stdout.push_str(&line);
                stdout.push('\n');
            },
            Err(_) => {
                if let Err(e) = child.kill() {
                    tracing::warn!(operation, error = %e, "could not kill timed out document engine");
                }
                let _ = child.wait();
                return Err(Error::EngineTimeout {
                    operation: operation.to_string(),
                    seconds: timeout.as_secs(),
                });
            },
        }
    }
    return Ok(stdout);
}

/// Read `pipe` line by line on its own thread, tagging each line with `wrap`.
fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    tx: crossbeam_channel::Sender<PipeMessage>,
    wrap: fn(String) -> PipeMessage,
) {
    std::thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for chunk in reader.split(b'\n') {
            let Ok(bytes) = chunk else { break };
            let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
            if tx.send(wrap(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(PipeMessage::Closed);
    });
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt as _;

    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        return path;
    }

    fn engine(dir: &Path, executable: PathBuf, timeout: Option<Duration>) -> ProcessEngine {
        return ProcessEngine::new(&EngineSettings {
            executable,
            scripts_dir: dir.join("scripts"),
            timeout,
        });
    }

    // One test so the stand-in executables are written before anything spawns.
    #[test]
    fn subprocess_adapter_behaviour() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        for op in ["scan_references", "list_scenes", "update_blend_paths"] {
            std::fs::write(scripts.join(format!("{op}.py")), "# stand-in").unwrap();
        }

        let chatty = write_script(
            dir.path(),
            "chatty.sh",
            "echo 'Blender 4.1'\necho 'LOG: opening'\necho 'JSON_OUTPUT: {\"success\": true, \"scenes\": [{\"name\": \"Main\", \"is_active\": true}]}'\necho 'Blender quit'\necho 'noise' >&2\nexit 3",
        );
        let scenes = engine(dir.path(), chatty, None).list_scenes(Path::new("/p/a.blend")).unwrap();
        assert!(scenes.success);
        assert_eq!(scenes.payload.scenes.len(), 1);
        assert!(scenes.payload.scenes[0].is_active);

        let refusing = write_script(
            dir.path(),
            "refusing.sh",
            "echo 'JSON_OUTPUT: {\"success\": false, \"errors\": [\"locked\"]}'",
        );
        let refused = engine(dir.path(), refusing, None)
            .update_paths(Path::new("/p/a.blend"), Path::new("/p/x.png"), Path::new("/p/y.png"))
            .unwrap();
        assert!(!refused.success);
        assert_eq!(refused.errors, vec!["locked".to_string()]);

        let silent = write_script(dir.path(), "silent.sh", "echo 'crashed'");
        let result = engine(dir.path(), silent, None).extract_references(Path::new("/p/a.blend"));
        assert!(matches!(result, Err(Error::MalformedResponse { .. })));

        let slow = write_script(dir.path(), "slow.sh", "exec sleep 5");
        let started = Instant::now();
        let result = engine(dir.path(), slow, Some(Duration::from_millis(200))).extract_references(Path::new("/p/a.blend"));
        assert!(matches!(result, Err(Error::EngineTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));

        let missing_script = engine(dir.path(), PathBuf::from("/bin/true"), None).validate_names(Path::new("/p/a.blend"));
        assert!(matches!(missing_script, Err(Error::EngineUnavailable { .. })));

        let missing_exe = engine(dir.path(), dir.path().join("absent"), None).extract_references(Path::new("/p/a.blend"));
        assert!(matches!(missing_exe, Err(Error::EngineUnavailable { .. })));
    }
}
