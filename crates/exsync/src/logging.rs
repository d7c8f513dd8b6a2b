//! Structured logging.
//!
//! Events go to stderr so stdout stays clean for reports. Use these field
//! names consistently: `path`, `spans`, `markers`, `exit_code`, `elapsed_ms`,
//! `status`.

use std::io::IsTerminal as _;

use anyhow::{Context, Result};
use exsync_contracts::ENV_LOG;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `level` (from `--log-level`) wins over `EXSYNC_LOG`, which wins over `warn`.
pub fn filter_for(level: Option<&str>, env_value: Option<String>) -> Result<EnvFilter> {
    if let Some(level) = level {
        return EnvFilter::try_new(level).with_context(|| format!("invalid --log-level: {level:?}"));
    }
    match env_value.filter(|v| !v.trim().is_empty()) {
        Some(v) => EnvFilter::try_new(&v).with_context(|| format!("invalid {ENV_LOG}: {v:?}")),
        None => Ok(EnvFilter::new(DEFAULT_LEVEL)),
    }
}

pub fn init_logging(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = filter_for(level, std::env::var(ENV_LOG).ok())?;
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_ansi(std::io::stderr().is_terminal()),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init(),
    }
    .context("install tracing subscriber")
}
