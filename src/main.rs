mod commands;
mod diagnostics;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use blendref::error::Error;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{Format, Workspace};

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "BLENDREF_LOG";

#[derive(Parser)]
#[command(name = "blendref", about = "Reference integrity for scene projects", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Document Engine executable, overriding `.blendref.toml`
    #[arg(global = true, long)]
    engine: Option<PathBuf>,
    /// Project root
    #[arg(default_value = ".", global = true, long)]
    root: PathBuf,
    /// Log more (-v info, -vv debug)
    #[arg(action = clap::ArgAction::Count, global = true, long, short)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Report broken links (exit 0 clean, 2 broken, 3 scan errors)
    Check {
        /// Output format
        #[arg(default_value = "text", long, value_enum)]
        format: Format,
    },
    /// Find exact or similar files for a missing filename
    Find {
        /// Filename (or any path ending in it)
        filename: String,
    },
    /// Move or rename a file or directory, updating every reference to it
    Mv {
        /// Current path
        old: PathBuf,
        /// New path
        new: PathBuf,
    },
    /// Show what a move or rename would change (exit 1 when invalid)
    Preview {
        /// Current path
        old: PathBuf,
        /// New path
        new: PathBuf,
        /// Output format
        #[arg(default_value = "text", long, value_enum)]
        format: Format,
    },
    /// List the documents referencing a file or any file under a directory
    Refs {
        /// File or directory, which need not exist
        target: PathBuf,
        /// Output format
        #[arg(default_value = "text", long, value_enum)]
        format: Format,
    },
    /// Plan repairs for broken links, optionally applying them
    Relink {
        /// Apply exact matches and every --map (or suggestions and every --rename)
        #[arg(long)]
        apply: bool,
        /// Point references stored as OLD at file NEW
        #[arg(conflicts_with = "names", long = "map", value_name = "OLD=NEW", value_parser = parse_mapping)]
        maps: Vec<(String, PathBuf)>,
        /// Repair missing named items inside linked libraries instead of missing files
        #[arg(long)]
        names: bool,
        /// Relink the missing item OLD to the library item NEW
        #[arg(long = "rename", requires = "names", value_name = "OLD=NEW", value_parser = parse_rename)]
        renames: Vec<(String, String)>,
    },
    /// List documents and assets
    Scan {
        /// List editor backup files instead
        #[arg(long)]
        backups: bool,
        /// Delete the listed backup files
        #[arg(long, requires = "backups")]
        delete: bool,
    },
    /// List the scenes of a document
    Scenes {
        /// Container document
        document: PathBuf,
    },
    /// Watch the project and re-run check on changes
    Watch {
        /// Output format
        #[arg(default_value = "text", long, value_enum)]
        format: Format,
    },
}

/// Install the stderr log subscriber. `BLENDREF_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| return EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    return match run(cli) {
        Ok(code) => code,
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::FAILURE
        },
    };
}

/// Parse `OLD=NEW` for `relink --map`.
///
/// # Errors
///
/// Returns a message if the value has no `=` or either side is empty.
fn parse_mapping(value: &str) -> Result<(String, PathBuf), String> {
    return match value.split_once('=') {
        Some((old, new)) if !old.is_empty() && !new.is_empty() => Ok((old.to_string(), PathBuf::from(new))),
        _ => Err(format!("expected OLD=NEW, got `{value}`")),
    };
}

/// Parse `OLD=NEW` for `relink --rename`.
///
/// # Errors
///
/// Returns a message if the value has no `=` or either side is empty.
fn parse_rename(value: &str) -> Result<(String, String), String> {
    return match value.split_once('=') {
        Some((old, new)) if !old.is_empty() && !new.is_empty() => Ok((old.to_string(), new.to_string())),
        _ => Err(format!("expected OLD=NEW, got `{value}`")),
    };
}

/// Dispatch a parsed command line.
///
/// # Errors
///
/// Returns any error from loading the workspace or running the command.
fn run(cli: Cli) -> Result<ExitCode, Error> {
    let workspace = Workspace::load(&cli.root, cli.engine.as_deref())?;

    return match cli.command {
        Commands::Check { format } => commands::check(&workspace, format),
        Commands::Find { filename } => commands::find(&workspace, &filename),
        Commands::Mv { old, new } => commands::mv(&workspace, &old, &new),
        Commands::Preview { format, new, old } => commands::preview(&workspace, &old, &new, format),
        Commands::Refs { format, target } => commands::refs(&workspace, &target, format),
        Commands::Relink { apply, names: true, renames, .. } => {
            Ok(commands::relink_names(&workspace, apply, &renames))
        },
        Commands::Relink { apply, maps, .. } => commands::relink(&workspace, apply, &maps),
        Commands::Scan { backups, delete } => Ok(commands::scan(&workspace, backups, delete)),
        Commands::Scenes { document } => commands::scenes(&workspace, &document),
        Commands::Watch { format } => watch::run(&workspace, format),
    };
}
