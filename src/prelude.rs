//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use keepn::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ConfigOverrides, WatchBackend};
pub use crate::core::duration::parse_duration;
pub use crate::core::errors::{KeepnError, Result};

// Pruning
pub use crate::pruner::{PruneReport, RetentionPolicy, prune};

// Watching
pub use crate::watcher::polling::PollingWatcher;
pub use crate::watcher::{Op, WatchChannels, WatchEvent, WatchSource, build_source};

// Daemon
pub use crate::daemon::loop_main::{EventLoop, LoopOptions, LoopState, LoopSummary, Verbosity};
#[cfg(feature = "daemon")]
pub use crate::daemon::runner::{DaemonReport, StopReason, run_daemon};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
