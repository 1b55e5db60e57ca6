//! Top-level CLI definition and dispatch.

use std::path::PathBuf;

use clap::Parser;
use colored::{Colorize, control};
use thiserror::Error;

use keepn::core::config::{Config, ConfigOverrides, WatchBackend};
use keepn::core::errors::KeepnError;
use keepn::daemon::loop_main::Verbosity;
use keepn::daemon::runner::{StopReason, run_daemon};
use keepn::daemon::signals::SignalHandler;

/// keepn: watch directories and keep only the newest N matching files.
#[derive(Debug, Parser)]
#[command(
    name = "keepn",
    author,
    version,
    about = "Watch directories and keep only the N most recently modified matching files",
    long_about = None
)]
pub struct Cli {
    /// Directories to watch. Defaults to the current directory.
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
    /// Poll interval such as 1s, 500ms or 1m30s [default: 1s].
    #[arg(long, value_name = "DURATION")]
    interval: Option<String>,
    /// Regex selecting which file names are subject to retention [default: .*].
    #[arg(long, value_name = "REGEX")]
    file_pattern: Option<String>,
    /// Number of most recent matching files to keep [default: 3].
    #[arg(long, value_name = "N")]
    num_files: Option<usize>,
    /// Override config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Change detection backend: poll or native [default: poll].
    #[arg(long, value_name = "BACKEND")]
    backend: Option<WatchBackend>,
    /// Exit on the first listing or deletion failure.
    #[arg(long)]
    strict: bool,
    /// Prune every watched directory once before watching.
    #[arg(long)]
    prune_on_start: bool,
    /// Activity log (JSONL) path.
    #[arg(long, value_name = "PATH")]
    activity_log: Option<PathBuf>,
    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
    /// Log every event and deletion.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    /// Errors only.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            paths: self.paths.clone(),
            interval: self.interval.clone(),
            file_pattern: self.file_pattern.clone(),
            num_files: self.num_files,
            backend: self.backend,
            strict: self.strict,
            prune_on_start: self.prune_on_start,
            activity_log: self.activity_log.clone(),
        }
    }

    const fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

/// CLI failure with its process exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad flags, bad config file, bad pattern or duration.
    #[error("{0}")]
    User(String),
    /// The daemon failed while running.
    #[error("{0}")]
    Runtime(String),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) => 2,
        }
    }
}

impl From<KeepnError> for CliError {
    fn from(error: KeepnError) -> Self {
        if error.is_config() {
            Self::User(error.to_string())
        } else {
            Self::Runtime(error.to_string())
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    let config = Config::load_with(cli.config.as_deref(), &cli.overrides())?;

    if cli.print_config {
        let rendered = toml::to_string_pretty(&config).map_err(|e| {
            CliError::Runtime(
                KeepnError::Serialization {
                    context: "toml",
                    details: e.to_string(),
                }
                .to_string(),
            )
        })?;
        print!("{rendered}");
        return Ok(());
    }

    let verbosity = cli.verbosity();
    let report = run_daemon(&config, verbosity, SignalHandler::new())?;

    if verbosity != Verbosity::Quiet {
        let s = &report.summary;
        let how = match report.stop_reason {
            StopReason::Signal => "stopped".green(),
            StopReason::SourceClosed => "watch source closed".yellow(),
        };
        eprintln!(
            "{} {how}: {} events, {} passes, {} files deleted, {} failed passes",
            "keepn".bold(),
            s.events_seen,
            s.passes_run,
            s.files_deleted,
            s.pass_failures
        );
    }
    Ok(())
}
