//! Watch sources: filesystem change notifications delivered over channels.
//!
//! A source owns three outlets that the event loop selects over:
//! - `events`: one [`WatchEvent`] per detected change
//! - `errors`: asynchronous failures of the notification mechanism
//! - `closed`: a single unit signal once the source has stopped
//!
//! Two implementations ship: [`polling::PollingWatcher`] (snapshot diff at a
//! fixed interval) and, with the `native` feature, [`native::NativeWatcher`]
//! (OS notifications through the `notify` crate).

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use regex::Regex;

use crate::core::config::WatchBackend;
use crate::core::errors::{KeepnError, Result};

#[cfg(feature = "native")]
pub mod native;
pub mod polling;

// ──────────────────── channel capacities ────────────────────

/// Source → loop events. Bounded: a slow loop back-pressures the source.
pub const EVENT_CHANNEL_CAP: usize = 1024;
const ERROR_CHANNEL_CAP: usize = 64;

// ──────────────────── events ────────────────────

/// Kind of change observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Write => "WRITE",
            Self::Remove => "REMOVE",
            Self::Rename => "RENAME",
            Self::Chmod => "CHMOD",
        })
    }
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub op: Op,
    pub path: PathBuf,
    pub is_dir: bool,
}

impl WatchEvent {
    #[must_use]
    pub fn new(op: Op, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            op,
            path: path.into(),
            is_dir,
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dir { "DIRECTORY" } else { "FILE" };
        write!(f, "{kind} {:?} {}", self.path, self.op)
    }
}

// ──────────────────── filter hooks ────────────────────

/// Predicate over `(name, full_path)`; `false` suppresses events for the entry.
pub type FilterHook = Arc<dyn Fn(&str, &Path) -> bool + Send + Sync>;

/// Build a hook that keeps entries whose name (or full path) matches `regex`.
#[must_use]
pub fn regex_filter_hook(regex: Regex, use_full_path: bool) -> FilterHook {
    Arc::new(move |name: &str, path: &Path| {
        if use_full_path {
            regex.is_match(&path.to_string_lossy())
        } else {
            regex.is_match(name)
        }
    })
}

// ──────────────────── source trait ────────────────────

/// Receivers handed to the event loop.
#[derive(Debug, Clone)]
pub struct WatchChannels {
    pub events: Receiver<WatchEvent>,
    pub errors: Receiver<KeepnError>,
    pub closed: Receiver<()>,
}

/// A producer of filesystem change events.
pub trait WatchSource: Send + Sync {
    /// Register a file or directory. Fails if the path cannot be watched.
    fn add(&self, path: &Path) -> Result<()>;

    /// Install a name filter applied to entries below the watched roots.
    fn set_filter(&self, hook: FilterHook);

    /// Receivers for events, errors and the closed signal.
    fn channels(&self) -> WatchChannels;

    /// Emit events until [`WatchSource::close`] is called. Blocks the caller.
    fn start(&self, interval: Duration) -> Result<()>;

    /// Stop the source. Idempotent; the closed signal fires once.
    fn close(&self);

    /// Currently registered roots.
    fn watched_paths(&self) -> Vec<PathBuf>;

    /// Short label for logs.
    fn backend(&self) -> WatchBackend;
}

/// Construct the source selected by `watch.backend`.
pub fn build_source(backend: WatchBackend) -> Result<Arc<dyn WatchSource>> {
    match backend {
        WatchBackend::Poll => Ok(Arc::new(polling::PollingWatcher::new())),
        #[cfg(feature = "native")]
        WatchBackend::Native => Ok(Arc::new(native::NativeWatcher::new()?)),
        #[cfg(not(feature = "native"))]
        WatchBackend::Native => Err(KeepnError::InvalidConfig {
            details: "native backend not compiled in (enable the \"native\" feature)"
                .to_string(),
        }),
    }
}

// ──────────────────── shared plumbing ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Idle,
    Running,
    Closed,
}

/// Outlets plus the idle → running → closed lifecycle shared by all sources.
pub(crate) struct Outlets {
    pub(crate) events_tx: Sender<WatchEvent>,
    pub(crate) errors_tx: Sender<KeepnError>,
    closed_tx: Sender<()>,
    channels: WatchChannels,
    state: Mutex<SourceState>,
    close_tx: Sender<()>,
    pub(crate) close_rx: Receiver<()>,
}

impl Outlets {
    pub(crate) fn new() -> Self {
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAP);
        let (errors_tx, errors_rx) = bounded(ERROR_CHANNEL_CAP);
        let (closed_tx, closed_rx) = bounded(1);
        let (close_tx, close_rx) = bounded(1);
        Self {
            events_tx,
            errors_tx,
            closed_tx,
            channels: WatchChannels {
                events: events_rx,
                errors: errors_rx,
                closed: closed_rx,
            },
            state: Mutex::new(SourceState::Idle),
            close_tx,
            close_rx,
        }
    }

    pub(crate) fn channels(&self) -> WatchChannels {
        self.channels.clone()
    }

    /// Transition to running. `Ok(false)` means the source was already closed.
    pub(crate) fn begin(&self, interval: Duration) -> Result<bool> {
        if interval.is_zero() {
            return Err(KeepnError::InvalidConfig {
                details: "watch interval must be greater than zero".to_string(),
            });
        }
        let mut state = self.state.lock();
        match *state {
            SourceState::Idle => {
                *state = SourceState::Running;
                Ok(true)
            }
            SourceState::Running => Err(KeepnError::AlreadyRunning),
            SourceState::Closed => Ok(false),
        }
    }

    pub(crate) fn request_close(&self) {
        let mut state = self.state.lock();
        match *state {
            SourceState::Idle => {
                *state = SourceState::Closed;
                let _ = self.closed_tx.try_send(());
            }
            SourceState::Running => {
                *state = SourceState::Closed;
                let _ = self.close_tx.try_send(());
            }
            SourceState::Closed => {}
        }
    }

    /// Called by the running loop on exit.
    pub(crate) fn finish(&self) {
        *self.state.lock() = SourceState::Closed;
        let _ = self.closed_tx.try_send(());
    }

    pub(crate) fn report_error(&self, error: KeepnError) {
        if self.errors_tx.try_send(error).is_err() {
            eprintln!("[KPN-WATCH] error channel full, dropping watch error");
        }
    }
}
