use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use exsync_contracts::{CONFIG_FILE_NAME, DEFAULT_ISSUES_LOG, EXSYNC_CONFIG_SCHEMA_VERSION};
use exsync_host_runner::{default_interpreter, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS};
use exsync_script::{AnnotationStyle, Profile};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::find_upwards;

const DEFAULT_RECURSION_GUARD: &str =
    r"(?m)\bexsync\s+(?:update|check|strip)\b|^\s*(?:import|from)\s+exsync\b";
const MIN_COLUMN_WIDTH: usize = 8;

/// On-disk `exsync.json`. Every field is optional; missing fields fall back to
/// the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub schema_version: Option<String>,
    pub verbose: Option<bool>,
    pub profile: Option<Profile>,
    pub column_width: Option<usize>,
    pub annotation_prefix: Option<String>,
    pub legacy_prefixes: Option<Vec<String>>,
    pub legacy_artifact_patterns: Option<Vec<String>>,
    pub interpreter_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub max_output_bytes: Option<usize>,
    pub jobs: Option<usize>,
    pub fail_fast: Option<bool>,
    pub extension: Option<String>,
    pub min_lines: Option<usize>,
    pub issues_log: Option<PathBuf>,
    pub skip_spawn_errors: Option<bool>,
    pub recursion_guard: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read config: {}", path.display()))?;
        let cfg: FileConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse config JSON: {}", path.display()))?;
        if let Some(v) = &cfg.schema_version {
            if v != EXSYNC_CONFIG_SCHEMA_VERSION {
                anyhow::bail!(
                    "{}: schema_version {v:?} is not supported (expected {EXSYNC_CONFIG_SCHEMA_VERSION:?})",
                    path.display()
                );
            }
        }
        Ok(cfg)
    }
}

/// Flags shared by every subcommand that reads configuration.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Configuration file (default: nearest `exsync.json` upwards from the current directory).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Annotation style.
    #[arg(long, value_enum)]
    pub profile: Option<Profile>,
    /// Wrap width for annotation text (overrides the profile).
    #[arg(long, value_name = "COLS")]
    pub column_width: Option<usize>,
    #[arg(long, value_name = "PREFIX")]
    pub annotation_prefix: Option<String>,
    /// Python interpreter used to run scripts.
    #[arg(long, value_name = "PATH")]
    pub python: Option<PathBuf>,
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
    /// Number of scripts processed in parallel.
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,
    /// Stop scheduling scripts after the first failure.
    #[arg(long)]
    pub fail_fast: bool,
    /// Keep scratch artifacts and never overwrite the original scripts.
    #[arg(long, short = 'v')]
    pub verbose: bool,
    #[arg(long, value_name = "PATH")]
    pub issues_log: Option<PathBuf>,
    /// Record interpreter spawn failures per script instead of aborting the batch.
    #[arg(long)]
    pub skip_spawn_errors: bool,
}

/// Fully merged and validated configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
    pub profile: Profile,
    pub style: AnnotationStyle,
    pub legacy_prefixes: Vec<String>,
    pub legacy_artifact_patterns: Vec<Regex>,
    pub interpreter: PathBuf,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    pub jobs: usize,
    pub fail_fast: bool,
    pub extension: String,
    pub min_lines: usize,
    pub issues_log: PathBuf,
    pub skip_spawn_errors: bool,
    pub recursion_guard: Regex,
}

impl Settings {
    /// Merges defaults, the config file, `env_python` and CLI flags, in
    /// increasing precedence.
    pub fn resolve(args: &ConfigArgs, cwd: &Path, env_python: Option<OsString>) -> Result<Self> {
        let config_path = match &args.config {
            Some(p) => {
                let p = if p.is_absolute() { p.clone() } else { cwd.join(p) };
                if !p.is_file() {
                    anyhow::bail!("config file does not exist: {}", p.display());
                }
                Some(p)
            }
            None => find_upwards(cwd, Path::new(CONFIG_FILE_NAME)),
        };
        let file = match &config_path {
            Some(p) => FileConfig::load(p)?,
            None => FileConfig::default(),
        };

        let profile = args.profile.or(file.profile).unwrap_or_default();
        let mut style = AnnotationStyle::for_profile(profile);
        if let Some(w) = args.column_width.or(file.column_width) {
            style.width = w;
        }
        if let Some(p) = args
            .annotation_prefix
            .clone()
            .or_else(|| file.annotation_prefix.clone())
        {
            style.prefix = p;
        }

        let interpreter = args
            .python
            .clone()
            .or_else(|| env_python.filter(|v| !v.is_empty()).map(PathBuf::from))
            .or_else(|| file.interpreter_path.clone())
            .unwrap_or_else(default_interpreter);

        let legacy_artifact_patterns = file
            .legacy_artifact_patterns
            .clone()
            .unwrap_or_default()
            .iter()
            .map(|p| {
                Regex::new(p).with_context(|| format!("invalid legacy_artifact_patterns entry: {p:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let guard_src = file
            .recursion_guard
            .clone()
            .unwrap_or_else(|| DEFAULT_RECURSION_GUARD.to_string());
        let recursion_guard = Regex::new(&guard_src)
            .with_context(|| format!("invalid recursion_guard: {guard_src:?}"))?;

        let issues_log = args
            .issues_log
            .clone()
            .or_else(|| file.issues_log.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ISSUES_LOG));
        let issues_log = if issues_log.is_absolute() {
            issues_log
        } else {
            cwd.join(issues_log)
        };

        let settings = Settings {
            config_path,
            verbose: args.verbose || file.verbose.unwrap_or(false),
            profile,
            style,
            legacy_prefixes: file.legacy_prefixes.clone().unwrap_or_default(),
            legacy_artifact_patterns,
            interpreter,
            timeout_secs: args
                .timeout_secs
                .or(file.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: file.max_output_bytes.unwrap_or(DEFAULT_MAX_OUTPUT_BYTES),
            jobs: args.jobs.or(file.jobs).unwrap_or(1),
            fail_fast: args.fail_fast || file.fail_fast.unwrap_or(false),
            extension: file
                .extension
                .clone()
                .unwrap_or_else(|| "py".to_string())
                .trim_start_matches('.')
                .to_string(),
            min_lines: file.min_lines.unwrap_or(1),
            issues_log,
            skip_spawn_errors: args.skip_spawn_errors || file.skip_spawn_errors.unwrap_or(false),
            recursion_guard,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.style.width < MIN_COLUMN_WIDTH {
            anyhow::bail!(
                "column_width must be at least {MIN_COLUMN_WIDTH} (got {})",
                self.style.width
            );
        }
        if self.style.prefix.contains('\n') {
            anyhow::bail!("annotation_prefix must be a single line");
        }
        if !is_distinct_comment_prefix(&self.style.prefix) {
            anyhow::bail!(
                "annotation_prefix must be '#' followed by a marker character (got {:?})",
                self.style.prefix
            );
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be at least 1");
        }
        if self.jobs == 0 {
            anyhow::bail!("jobs must be at least 1");
        }
        if self.max_output_bytes == 0 {
            anyhow::bail!("max_output_bytes must be at least 1");
        }
        if self.extension.is_empty() {
            anyhow::bail!("extension must not be empty");
        }
        for p in &self.legacy_prefixes {
            if !is_distinct_comment_prefix(p) {
                anyhow::bail!(
                    "legacy_prefixes entries must be '#' followed by a marker character (got {p:?})"
                );
            }
        }
        Ok(())
    }
}

/// A bare `#` would also match every ordinary comment.
fn is_distinct_comment_prefix(prefix: &str) -> bool {
    prefix
        .strip_prefix('#')
        .is_some_and(|rest| !rest.trim().is_empty())
}
