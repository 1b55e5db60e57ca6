//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Everything else holds an
//! [`ActivityLoggerHandle`] and sends [`ActivityEvent`]s over a bounded
//! crossbeam channel with `try_send`, so a slow disk never stalls pruning.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{KeepnError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::pruner::PruneReport;

const CHANNEL_CAPACITY: usize = 1024;

/// Things worth a line in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        backend: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    WatchAdded {
        path: String,
    },
    PrunePass {
        directory: String,
        pattern: String,
        keep: usize,
        matched: usize,
        deleted: usize,
        failed: usize,
        duration_ms: u64,
    },
    FileDeleted {
        path: String,
    },
    FileDeleteFailed {
        path: String,
        error_code: String,
        error_message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Stops the logger thread after everything queued before it is written.
    Shutdown,
}

impl ActivityEvent {
    /// Summary record for a finished pruning pass.
    #[must_use]
    pub fn prune_pass(report: &PruneReport, pattern: &str, keep: usize) -> Self {
        Self::PrunePass {
            directory: report.directory.display().to_string(),
            pattern: pattern.to_string(),
            keep,
            matched: report.matched,
            deleted: report.deleted.len(),
            failed: report.failures.len(),
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    #[must_use]
    pub fn error(error: &KeepnError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Cloneable sender side of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events go nowhere.
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event. Drops it (and counts the drop) if the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the queue is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// Record each deletion and failure of a pass, then its summary.
    pub fn record_pass(&self, report: &PruneReport, pattern: &str, keep: usize) {
        for path in &report.deleted {
            self.send(ActivityEvent::FileDeleted {
                path: path.display().to_string(),
            });
        }
        for failure in &report.failures {
            let path = match failure {
                KeepnError::RemoveFile { path, .. } => path.display().to_string(),
                _ => report.directory.display().to_string(),
            };
            self.send(ActivityEvent::FileDeleteFailed {
                path,
                error_code: failure.code().to_string(),
                error_message: failure.to_string(),
            });
        }
        self.send(ActivityEvent::prune_pass(report, pattern, keep));
    }
}

/// Spawn the logger thread writing to `config.path`.
pub fn spawn_logger(config: JsonlConfig) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    spawn_logger_with_capacity(config, CHANNEL_CAPACITY)
}

pub fn spawn_logger_with_capacity(
    config: JsonlConfig,
    capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("keepn-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| KeepnError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

/// Convenience for callers that only have a path.
pub fn spawn_logger_at(path: &Path) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    spawn_logger(JsonlConfig::for_path(path))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} activity events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
        // Flush per event so `tail -f` readers stay current.
        jsonl.flush();
    }

    jsonl.flush();
    jsonl.fsync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            backend,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} backend={backend}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e
        }
        ActivityEvent::WatchAdded { path } => {
            let mut e = LogEntry::new(EventType::WatchAdd, Severity::Info);
            e.path = Some(path.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::PrunePass {
            directory,
            pattern,
            keep,
            matched,
            deleted,
            failed,
            duration_ms,
        } => {
            let severity = if *failed > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::PrunePass, severity);
            e.path = Some(directory.clone());
            e.pattern = Some(pattern.clone());
            e.keep = Some(*keep);
            e.matched = Some(*matched);
            e.deleted = Some(*deleted);
            e.failed = Some(*failed);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failed == 0);
            e
        }
        ActivityEvent::FileDeleted { path } => {
            let mut e = LogEntry::new(EventType::FileDelete, Severity::Info);
            e.path = Some(path.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileDeleteFailed {
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::FileDelete, Severity::Warning);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some("logger shutdown".to_string());
            e
        }
    }
}
