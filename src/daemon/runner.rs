//! Daemon orchestration: wires config, activity logger, watch source, event
//! loop and signal supervisor together and runs them to completion.
//!
//! Threads:
//! - caller thread: drives the watch source (`start` blocks)
//! - `keepn-loop`: the event loop; closes the source when it stops
//! - `keepn-signals`: closes the source on SIGINT/SIGTERM
//! - `keepn-logger`: activity JSONL writer

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;

use crate::core::config::Config;
use crate::core::duration::format_duration;
use crate::core::errors::{KeepnError, Result};
use crate::daemon::loop_main::{EventLoop, LoopSummary, Verbosity};
use crate::daemon::signals::{SignalHandler, spawn_supervisor};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger_at};
use crate::watcher::{WatchSource, build_source, regex_filter_hook};

/// Why the daemon stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT/SIGTERM (or a programmatic shutdown request).
    Signal,
    /// The watch source closed on its own.
    SourceClosed,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::SourceClosed => "source closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonReport {
    pub summary: LoopSummary,
    pub stop_reason: StopReason,
}

/// Run the daemon until a signal, the source closing, or a fatal error.
pub fn run_daemon(
    config: &Config,
    verbosity: Verbosity,
    signals: SignalHandler,
) -> Result<DaemonReport> {
    let started = Instant::now();
    let (logger, logger_join) = spawn_logger_at(&config.paths.activity_log)?;

    let outcome = run_with_logger(config, verbosity, signals, &logger);

    let reason = match &outcome {
        Ok(report) => report.stop_reason.as_str().to_string(),
        Err(e) => format!("error {}", e.code()),
    };
    let uptime_secs = started.elapsed().as_secs();
    logger.send(ActivityEvent::DaemonStopped {
        reason: reason.clone(),
        uptime_secs,
    });
    logger.shutdown();
    let _ = logger_join.join();

    if verbosity != Verbosity::Quiet {
        eprintln!("[KPN-DAEMON] shutdown complete (reason={reason}, uptime={uptime_secs}s)");
    }
    outcome
}

fn run_with_logger(
    config: &Config,
    verbosity: Verbosity,
    signals: SignalHandler,
    logger: &ActivityLoggerHandle,
) -> Result<DaemonReport> {
    let pattern = config.compiled_pattern()?;
    let interval = config.poll_interval()?;
    let paths = config.watch_paths()?;

    let config_hash = config.stable_hash().unwrap_or_default();
    logger.send(ActivityEvent::DaemonStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config_hash.clone(),
        backend: config.watch.backend.as_str().to_string(),
    });
    if verbosity != Verbosity::Quiet {
        eprintln!(
            "[KPN-DAEMON] keepn {} starting: backend={} interval={} pattern={:?} keep={} config_hash={config_hash}",
            env!("CARGO_PKG_VERSION"),
            config.watch.backend.as_str(),
            format_duration(interval),
            config.watch.file_pattern,
            config.retention.num_files,
        );
    }

    let mut event_loop = EventLoop::from_config(config, verbosity, logger.clone())?;
    event_loop.prune_on_start(&paths)?;

    let source = build_source(config.watch.backend)?;
    source.set_filter(regex_filter_hook(pattern, false));
    for path in &paths {
        source.add(path)?;
        logger.send(ActivityEvent::WatchAdded {
            path: path.display().to_string(),
        });
        if verbosity != Verbosity::Quiet {
            eprintln!("[KPN-WATCH] watching {}", path.display());
        }
    }

    let channels = source.channels();
    let loop_source = Arc::clone(&source);
    let loop_join = thread::Builder::new()
        .name("keepn-loop".to_string())
        .spawn(move || {
            let result = event_loop.run(&channels);
            loop_source.close();
            result
        })
        .map_err(|e| KeepnError::Runtime {
            details: format!("failed to spawn event loop thread: {e}"),
        })?;

    let (done_tx, done_rx) = bounded::<()>(1);
    let supervisor = match spawn_supervisor(signals, Arc::clone(&source), done_rx) {
        Ok(join) => Some(join),
        Err(e) => {
            eprintln!("[KPN-SIGNAL] {e}; signals will not stop the daemon cleanly");
            None
        }
    };

    let started = source.start(interval);
    if started.is_err() {
        source.close();
    }

    let loop_result = loop_join.join().unwrap_or_else(|_| {
        Err(KeepnError::Runtime {
            details: "event loop thread panicked".to_string(),
        })
    });
    drop(done_tx);
    let signalled = supervisor.is_some_and(|join| join.join().unwrap_or(false));

    started?;
    let summary = loop_result?;
    Ok(DaemonReport {
        summary,
        stop_reason: if signalled {
            StopReason::Signal
        } else {
            StopReason::SourceClosed
        },
    })
}
