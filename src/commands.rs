//! CLI commands for blendref: scan, check, preview, mv, find, refs, relink, scenes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use blendref::config::Config;
use blendref::engine::{ProcessEngine, Project};
use blendref::error::Error;
use blendref::scanner::ScanRules;
use blendref::types::{OperationResult, ProgressSink};
use blendref::{broken, executor, paths, planner, references, relink, scanner, similarity};

use crate::diagnostics;

/// Output format for reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Pretty-printed JSON on stdout.
    Json,
    /// Markdown-flavoured text.
    #[default]
    Text,
}

/// Loaded configuration plus the engine adapter it describes.
pub struct Workspace {
    /// Parsed `.blendref.toml`.
    config: Config,
    /// Subprocess adapter.
    engine: ProcessEngine,
    /// Absolute project root.
    root: PathBuf,
}

impl Workspace {
    /// Load configuration from `root`, applying a command-line engine override.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the root cannot be made absolute, or any config error.
    pub fn load(root: &Path, engine_override: Option<&Path>) -> Result<Self, Error> {
        let root = paths::absolute(root)?;
        let mut config = Config::load(&root)?;
        if let Some(executable) = engine_override {
            config.engine.executable = executable.to_path_buf();
        }
        let engine = ProcessEngine::new(&config.engine);
        return Ok(Self { config, engine, root });
    }

    /// Engine, root and rules bundled for library calls.
    fn project(&self) -> Project<'_> {
        return Project {
            engine: &self.engine,
            root: &self.root,
            rules: &self.config.rules,
        };
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        return &self.root;
    }

    /// Traversal rules from the config.
    pub const fn rules(&self) -> &ScanRules {
        return &self.config.rules;
    }
}

/// Report broken links. Exit 0 when clean, 2 on broken links, 3 when any document failed to scan.
///
/// # Errors
///
/// Returns `Error::Json` if the report cannot be serialized.
pub fn check(workspace: &Workspace, format: Format) -> Result<ExitCode, Error> {
    let report = broken::scan_broken_links(&workspace.project(), workspace.config.matching);
    emit(format, &report, || return diagnostics::render_report(&report))?;

    if !report.failures.is_empty() {
        return Ok(ExitCode::from(3_u8));
    }
    if report.total_issues() > 0 {
        return Ok(ExitCode::from(2_u8));
    }
    return Ok(ExitCode::SUCCESS);
}

/// `path` relative to `root` when it lies beneath it.
fn display_relative(path: &Path, root: &Path) -> String {
    return path.strip_prefix(root).unwrap_or(path).display().to_string();
}

/// Print `value` as JSON, or the text rendering.
///
/// # Errors
///
/// Returns `Error::Json` if serialization fails.
fn emit<T: serde::Serialize>(format: Format, value: &T, text: impl FnOnce() -> String) -> Result<(), Error> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => print!("{}", text()),
    }
    return Ok(());
}

/// Exit 0 on success, 1 otherwise.
fn exit_for(result: &OperationResult) -> ExitCode {
    if result.success {
        return ExitCode::SUCCESS;
    }
    return ExitCode::from(1_u8);
}

/// Exact or similar candidates for a missing filename.
///
/// # Errors
///
/// Returns `Error::Validation` if the filename is blank.
pub fn find(workspace: &Workspace, filename: &str) -> Result<ExitCode, Error> {
    let candidates =
        similarity::find_candidates(filename, &workspace.root, &workspace.config.rules, workspace.config.matching)?;
    print!("{}", diagnostics::render_candidates(filename, &candidates));
    return Ok(match candidates {
        similarity::Candidates::None => ExitCode::from(1_u8),
        similarity::Candidates::Exact(_) | similarity::Candidates::Fuzzy(_) => ExitCode::SUCCESS,
    });
}

/// Move or rename a file or directory, updating every reference to it.
///
/// # Errors
///
/// Returns `Error::Io` if the paths cannot be made absolute.
pub fn mv(workspace: &Workspace, old: &Path, new: &Path) -> Result<ExitCode, Error> {
    let source = paths::absolute(old)?;
    let destination = paths::absolute(new)?;

    let mut on_progress = |percent: u8, message: &str| {
        eprintln!("[{percent:>3}%] {message}");
    };
    let mut progress = ProgressSink::new(&mut on_progress);
    let result = executor::execute_move(&workspace.project(), &source, &destination, &mut progress);
    print!("{}", diagnostics::render_result(&result));
    return Ok(exit_for(&result));
}

/// Preview a move or rename. Exit 1 when the operation is invalid.
///
/// # Errors
///
/// Returns `Error::Io` if the paths cannot be made absolute, or `Error::Json` if serialization fails.
pub fn preview(workspace: &Workspace, old: &Path, new: &Path, format: Format) -> Result<ExitCode, Error> {
    let source = paths::absolute(old)?;
    let destination = paths::absolute(new)?;
    let preview = planner::preview_move(&workspace.project(), &source, &destination);
    emit(format, &preview, || return diagnostics::render_preview(&preview))?;

    if preview.is_valid() {
        return Ok(ExitCode::SUCCESS);
    }
    return Ok(ExitCode::from(1_u8));
}

/// Documents referencing a file, or any file under a directory. Exit 3 when
/// any document failed to scan.
///
/// # Errors
///
/// Returns `Error::Io` if the target cannot be made absolute, or `Error::Json` if serialization fails.
pub fn refs(workspace: &Workspace, target: &Path, format: Format) -> Result<ExitCode, Error> {
    let found = references::referencing_documents(&workspace.project(), target)?;
    emit(format, &found, || return diagnostics::render_referrers(target, &found))?;

    if !found.failures.is_empty() {
        return Ok(ExitCode::from(3_u8));
    }
    return Ok(ExitCode::SUCCESS);
}

/// Plan repairs for broken links, and apply them with `apply`.
///
/// Exact matches are staged automatically; each `manual` pair maps a stored
/// path to a chosen file and wins over an automatic choice.
///
/// # Errors
///
/// Returns `Error::Io` if a manual target cannot be made absolute, or
/// `Error::Validation` if a manual target does not exist.
pub fn relink(workspace: &Workspace, apply: bool, manual: &[(String, PathBuf)]) -> Result<ExitCode, Error> {
    let project = workspace.project();
    let report = broken::scan_broken_links(&project, workspace.config.matching);
    if report.total_broken() == 0 {
        println!("Nothing to relink");
        return Ok(ExitCode::SUCCESS);
    }

    let plan = relink::plan_relink(&report, &workspace.root, &workspace.config.rules, workspace.config.matching);
    print!("{}", diagnostics::render_relink_plan(&plan));
    if !apply {
        return Ok(ExitCode::SUCCESS);
    }

    let mut remap: BTreeMap<String, PathBuf> = plan.auto_remap();
    for (stored, target) in manual {
        let target = paths::absolute(target)?;
        if !target.is_file() {
            return Err(Error::validation(format!("relink target does not exist: {}", target.display())));
        }
        remap.insert(stored.clone(), target);
    }
    if remap.is_empty() {
        println!("No automatic match; pass --map OLD=NEW to choose");
        return Ok(ExitCode::from(1_u8));
    }

    let result = relink::apply_remap(project.engine, &report, &remap);
    print!("{}", diagnostics::render_result(&result));
    return Ok(exit_for(&result));
}

/// Relink missing named items inside linked libraries, and apply with `apply`.
///
/// Each missing item gets its best suggestion; `manual` pairs map a missing
/// item name to a replacement and win over the suggestion.
pub fn relink_names(workspace: &Workspace, apply: bool, manual: &[(String, String)]) -> ExitCode {
    let project = workspace.project();
    let report = broken::scan_broken_links(&project, workspace.config.matching);
    if report.total_unresolved_names() == 0 {
        println!("No unresolved names");
        return ExitCode::SUCCESS;
    }

    let mut renames = relink::suggested_renames(&report);
    for (old, new) in manual {
        renames.insert(old.clone(), new.clone());
    }
    print!("{}", diagnostics::render_name_plan(&report, &renames));
    if !apply {
        return ExitCode::SUCCESS;
    }
    if renames.is_empty() {
        println!("No suggestion; pass --rename OLD=NEW to choose");
        return ExitCode::from(1_u8);
    }

    let result = relink::apply_name_remap(project.engine, &report, &renames);
    print!("{}", diagnostics::render_result(&result));
    return exit_for(&result);
}

/// List container documents and assets, or backup files with `backups`.
/// With `delete` the backups are removed; exit 1 if any could not be.
pub fn scan(workspace: &Workspace, backups: bool, delete: bool) -> ExitCode {
    let rules = &workspace.config.rules;
    if backups && delete {
        let cleanup = scanner::clean_backups(&workspace.root, rules);
        print!("{}", diagnostics::render_cleanup(&cleanup));
        if cleanup.failed.is_empty() {
            return ExitCode::SUCCESS;
        }
        return ExitCode::from(1_u8);
    }
    if backups {
        let found = scanner::find_backups(&workspace.root, rules);
        for path in &found {
            println!("{}", display_relative(path, &workspace.root));
        }
        println!("{} backup file(s)", found.len());
        return ExitCode::SUCCESS;
    }

    let inventory = scanner::scan(&workspace.root, rules);
    println!("# Documents\n");
    for path in &inventory.documents {
        println!("- {}", display_relative(path, &workspace.root));
    }
    println!("\n# Assets\n");
    for path in &inventory.assets {
        println!("- {}", display_relative(path, &workspace.root));
    }
    println!(
        "\n{} document(s), {} asset(s)",
        inventory.documents.len(),
        inventory.assets.len()
    );
    return ExitCode::SUCCESS;
}

/// List the scenes of a container, marking the active one.
///
/// # Errors
///
/// Returns a transport error, or `Error::EngineFailure` if the engine refuses.
pub fn scenes(workspace: &Workspace, document: &Path) -> Result<ExitCode, Error> {
    let document = paths::absolute(document)?;
    for scene in references::scenes(&workspace.engine, &document)? {
        let marker = if scene.is_active { "*" } else { " " };
        println!("{marker} {}", scene.name);
    }
    return Ok(ExitCode::SUCCESS);
}
