//! Event loop: consumes watch-source channels and runs a retention pass for
//! every directory event.
//!
//! Single-threaded by construction: one event is handled to completion before
//! the next is received, so two passes never race on the same directory.
//!
//! Error policy:
//! - errors reported by the watch source always stop the loop
//! - pruning failures are logged and skipped, unless `strict` is set, in which
//!   case the first failure stops the loop

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use crossbeam_channel::select;

use crate::core::config::Config;
use crate::core::errors::{KeepnError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::pruner::{PruneReport, RetentionPolicy};
use crate::watcher::{Op, WatchChannels, WatchEvent};

/// How chatty the console output is. Errors are always printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopOptions {
    /// Stop on the first pruning failure instead of logging it.
    pub strict: bool,
    /// Prune every watched directory once before consuming events.
    pub prune_on_start: bool,
    pub verbosity: Verbosity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Counters accumulated over the loop's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub events_seen: u64,
    pub directory_events: u64,
    pub passes_run: u64,
    pub files_deleted: u64,
    pub pass_failures: u64,
}

pub struct EventLoop {
    policy: RetentionPolicy,
    options: LoopOptions,
    logger: ActivityLoggerHandle,
    state: LoopState,
    summary: LoopSummary,
    started: Instant,
}

impl EventLoop {
    pub fn new(policy: RetentionPolicy, options: LoopOptions, logger: ActivityLoggerHandle) -> Self {
        Self {
            policy,
            options,
            logger,
            state: LoopState::Running,
            summary: LoopSummary::default(),
            started: Instant::now(),
        }
    }

    /// Build from the effective configuration.
    pub fn from_config(
        config: &Config,
        verbosity: Verbosity,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let options = LoopOptions {
            strict: config.retention.strict,
            prune_on_start: config.retention.prune_on_start,
            verbosity,
        };
        Ok(Self::new(RetentionPolicy::from_config(config)?, options, logger))
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> &LoopSummary {
        &self.summary
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// One pass over each directory in `paths` when startup pruning is on.
    pub fn prune_on_start(&mut self, paths: &[PathBuf]) -> Result<()> {
        if !self.options.prune_on_start {
            return Ok(());
        }
        for path in paths.iter().filter(|p| p.is_dir()) {
            self.prune_directory(path)?;
        }
        Ok(())
    }

    /// Consume `channels` until the source closes or a fatal error arrives.
    pub fn run(&mut self, channels: &WatchChannels) -> Result<LoopSummary> {
        if self.state == LoopState::Stopped {
            return Err(KeepnError::Runtime {
                details: "event loop already stopped".to_string(),
            });
        }

        let outcome = loop {
            select! {
                recv(channels.events) -> msg => match msg {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(&event) {
                            break Err(e);
                        }
                    }
                    Err(_) => break Ok(()),
                },
                recv(channels.errors) -> msg => match msg {
                    Ok(e) => {
                        eprintln!("[KPN-WATCH] fatal watch error: {e}");
                        self.logger.send(ActivityEvent::error(&e));
                        break Err(e);
                    }
                    Err(_) => break Ok(()),
                },
                recv(channels.closed) -> _ => break Ok(()),
            }
        };

        self.state = LoopState::Stopped;
        if self.options.verbosity != Verbosity::Quiet {
            let s = &self.summary;
            eprintln!(
                "[KPN-DAEMON] event loop stopped after {}s: events={} passes={} deleted={} failures={}",
                self.started.elapsed().as_secs(),
                s.events_seen,
                s.passes_run,
                s.files_deleted,
                s.pass_failures
            );
        }
        outcome.map(|()| self.summary.clone())
    }

    /// Prune on directory events, ignore everything else.
    pub fn handle_event(&mut self, event: &WatchEvent) -> Result<()> {
        self.summary.events_seen += 1;
        if self.options.verbosity == Verbosity::Verbose {
            eprintln!("[KPN-WATCH] {event}");
        }
        if !event.is_dir {
            return Ok(());
        }
        self.summary.directory_events += 1;
        // A removed directory has nothing left to prune.
        if event.op == Op::Remove {
            return Ok(());
        }
        self.prune_directory(&event.path)
    }

    fn prune_directory(&mut self, dir: &Path) -> Result<()> {
        self.summary.passes_run += 1;
        let report = match self.policy.prune(dir) {
            Ok(report) => report,
            Err(e) => {
                self.summary.pass_failures += 1;
                let next = if self.options.strict {
                    "stopping"
                } else if e.is_retryable() {
                    "retrying on next event"
                } else {
                    "not retryable"
                };
                eprintln!("[KPN-PRUNE] pass over {} failed ({next}): {e}", dir.display());
                self.logger.send(ActivityEvent::error(&e));
                return if self.options.strict { Err(e) } else { Ok(()) };
            }
        };

        self.summary.files_deleted += report.deleted.len() as u64;
        self.logger
            .record_pass(&report, self.policy.pattern().as_str(), self.policy.keep());
        self.print_report(&report);

        if report.is_clean() {
            return Ok(());
        }
        self.summary.pass_failures += 1;
        for failure in &report.failures {
            eprintln!("[KPN-PRUNE] {failure}");
        }
        if self.options.strict {
            report.into_result()?;
        }
        Ok(())
    }

    fn print_report(&self, report: &PruneReport) {
        match self.options.verbosity {
            Verbosity::Quiet => {}
            Verbosity::Normal if report.deleted.is_empty() => {}
            Verbosity::Normal | Verbosity::Verbose => {
                eprintln!(
                    "[KPN-PRUNE] {}: matched={} kept={} deleted={} ({} ms)",
                    report.directory.display(),
                    report.matched,
                    report.retained.len(),
                    report.deleted.len(),
                    report.duration.as_millis()
                );
                if self.options.verbosity == Verbosity::Verbose {
                    for path in &report.deleted {
                        eprintln!("[KPN-PRUNE]   removed {}", path.display());
                    }
                }
            }
        }
    }
}
