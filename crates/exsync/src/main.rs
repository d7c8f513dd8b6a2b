use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use exsync_contracts::ENV_PYTHON;

mod batch;
mod config;
mod inputs;
mod issues;
mod logging;
mod report;
mod update;
mod util;

use config::{ConfigArgs, Settings};
use issues::IssuesLog;
use logging::LogFormat;
use report::{Mode, UpdateReport};
use update::Updater;

#[derive(Parser, Debug)]
#[command(name = "exsync")]
#[command(about = "Keep the printed output of example scripts in sync with their code.", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter directive (e.g. `info`, `exsync=debug`); overrides EXSYNC_LOG.
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run scripts and rewrite their output annotations in place.
    Update(RunArgs),
    /// Run scripts and report those whose annotations are out of date.
    Check(RunArgs),
    /// Remove all output annotations without running anything.
    Strip(RunArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Script files, directories or glob patterns.
    #[arg(value_name = "PATH", required = true)]
    inputs: Vec<String>,

    #[command(flatten)]
    config: ConfigArgs,

    /// Print a machine-readable report on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "aborted");
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref(), cli.log_format)?;

    let (mode, args) = match cli.command {
        Command::Update(args) => (Mode::Update, args),
        Command::Check(args) => (Mode::Check, args),
        Command::Strip(args) => (Mode::Strip, args),
    };
    cmd_run(mode, args)
}

fn cmd_run(mode: Mode, args: RunArgs) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("get current dir")?;
    let settings = Settings::resolve(&args.config, &cwd, std::env::var_os(ENV_PYTHON))?;
    if let Some(p) = &settings.config_path {
        tracing::debug!(config = %p.display(), "loaded configuration");
    }

    let files = inputs::collect_inputs(&args.inputs, &settings.extension)
        .context("collect inputs")?;
    tracing::info!(
        mode = mode.as_str(),
        profile = settings.profile.as_str(),
        files = files.len(),
        jobs = settings.jobs,
        "starting"
    );

    let issues = IssuesLog::new(settings.issues_log.clone());
    let updater = Updater::new(&settings, mode, &issues);
    let outcomes = batch::run_batch(&updater, &files, settings.jobs, settings.fail_fast)?;

    let report = UpdateReport::new(updater.mode(), outcomes, Some(issues.path()));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_human());
    }
    Ok(ExitCode::from(report.summary.exit_code()))
}
