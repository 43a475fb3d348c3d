use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::scanner::{ALWAYS_IGNORED, DEFAULT_IGNORED, ScanRules};
use crate::similarity::MatchOptions;

/// Name of the per-project configuration file.
pub const CONFIG_FILE: &str = ".blendref.toml";

/// Project configuration loaded from `.blendref.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    /// How to launch the Document Engine.
    pub engine: EngineSettings,
    /// Fuzzy matching settings for relinking.
    pub matching: MatchOptions,
    /// Traversal rules for the project tree.
    pub rules: ScanRules,
}

/// Resolved Document Engine launch settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Host executable.
    pub executable: PathBuf,
    /// Directory holding one `<operation>.py` script per protocol operation.
    pub scripts_dir: PathBuf,
    /// Overrides the per-operation default timeout when set.
    pub timeout: Option<Duration>,
}

/// Raw TOML structure for `.blendref.toml`.
#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct BlendrefTomlConfig {
    #[serde(default)]
    engine: RawEngine,
    #[serde(default)]
    relink: RawRelink,
    #[serde(default)]
    scan: RawScan,
}

/// Raw `[engine]` table.
#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngine {
    executable: Option<PathBuf>,
    scripts_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

/// Raw `[relink]` table.
#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelink {
    max_matches: Option<usize>,
    threshold: Option<f64>,
}

/// Raw `[scan]` table.
#[derive(Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScan {
    asset_extensions: Option<Vec<String>>,
    backup_extensions: Option<Vec<String>>,
    document_extensions: Option<Vec<String>>,
    ignore: Option<Vec<String>>,
    ignore_hidden: Option<bool>,
}

impl Config {
    /// Build a config from its raw TOML form, filling defaults and anchoring paths at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the relink threshold is outside `0.0..=1.0`.
    fn from_raw(root: &Path, raw: BlendrefTomlConfig) -> Result<Self, Error> {
        let threshold = raw.relink.threshold.unwrap_or(MatchOptions::DEFAULT_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::validation(format!(
                "relink.threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }

        let mut ignore: Vec<String> = ALWAYS_IGNORED.iter().map(|s| return (*s).to_string()).collect();
        match raw.scan.ignore {
            Some(user) => ignore.extend(user),
            None => ignore.extend(DEFAULT_IGNORED.iter().map(|s| return (*s).to_string())),
        }
        let defaults = ScanRules::default();
        let rules = ScanRules::new(
            &ignore,
            raw.scan.ignore_hidden.unwrap_or(true),
            raw.scan.document_extensions.unwrap_or(defaults.document_extensions),
            raw.scan.asset_extensions.unwrap_or(defaults.asset_extensions),
            raw.scan.backup_extensions.unwrap_or(defaults.backup_extensions),
        );

        let scripts_dir = raw.engine.scripts_dir.unwrap_or_else(|| return PathBuf::from("engine_scripts"));
        let engine = EngineSettings {
            executable: raw.engine.executable.unwrap_or_else(|| return PathBuf::from("blender")),
            scripts_dir: root.join(scripts_dir),
            timeout: raw.engine.timeout_secs.map(Duration::from_secs),
        };

        let matching = MatchOptions {
            max_matches: raw.relink.max_matches.unwrap_or(MatchOptions::DEFAULT_MAX_MATCHES),
            threshold,
        };

        return Ok(Self { engine, matching, rules });
    }

    /// Load config from `.blendref.toml` in the given root directory.
    /// Returns defaults if the file doesn't exist.
    /// Returns an error if the file exists but is malformed: never silently
    /// falls back to defaults when the user wrote a config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// `Error::TomlDe` if the TOML is malformed,
    /// or `Error::Validation` if a value is out of range.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Self::from_raw(root, BlendrefTomlConfig::default());
            },
            Err(e) => return Err(Error::Io(e)),
            Ok(c) => c,
        };

        return Self::parse(root, &content);
    }

    /// Parse config content as if it were read from `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the TOML is malformed,
    /// or `Error::Validation` if a value is out of range.
    pub fn parse(root: &Path, content: &str) -> Result<Self, Error> {
        let raw: BlendrefTomlConfig = toml::from_str(content)?;
        return Self::from_raw(root, raw);
    }
}
