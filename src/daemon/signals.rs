//! SIGTERM/SIGINT handling.
//!
//! `signal-hook` flips an atomic flag from the handler; a supervisor thread
//! polls it and closes the watch source, which unwinds the daemon through the
//! normal closed-signal path.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{KeepnError, Result};
use crate::watcher::WatchSource;

/// How often the supervisor checks the shutdown flag.
pub const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shutdown flag shared between the OS handler and the supervisor.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM/SIGINT. Registration failures are
    /// logged, not fatal.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// A handler not wired to any OS signal; shutdown only via `request_shutdown`.
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[KPN-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[KPN-SIGNAL] failed to register SIGINT: {e}");
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the supervisor. It closes `source` once shutdown is requested and
/// exits on its own when `done` fires or disconnects.
///
/// Returns whether the supervisor initiated the shutdown.
pub fn spawn_supervisor(
    handler: SignalHandler,
    source: Arc<dyn WatchSource>,
    done: Receiver<()>,
) -> Result<thread::JoinHandle<bool>> {
    thread::Builder::new()
        .name("keepn-signals".to_string())
        .spawn(move || {
            loop {
                match done.recv_timeout(SIGNAL_POLL_INTERVAL) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                if handler.should_shutdown() {
                    eprintln!("[KPN-SIGNAL] shutdown requested, closing watch source");
                    source.close();
                    return true;
                }
            }
        })
        .map_err(|e| KeepnError::Runtime {
            details: format!("failed to spawn signal supervisor: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::polling::PollingWatcher;
    use crossbeam_channel::bounded;

    #[test]
    fn flag_starts_clear() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_shutdown());
    }

    #[test]
    fn clones_share_the_flag() {
        let handler = SignalHandler::unregistered();
        let other = handler.clone();
        handler.request_shutdown();
        assert!(other.should_shutdown());
    }

    #[test]
    fn supervisor_closes_source_on_shutdown() {
        let source: Arc<dyn WatchSource> = Arc::new(PollingWatcher::new());
        let channels = source.channels();
        let handler = SignalHandler::unregistered();
        let (_done_tx, done_rx) = bounded::<()>(1);

        let join = spawn_supervisor(handler.clone(), Arc::clone(&source), done_rx).unwrap();
        handler.request_shutdown();

        assert!(join.join().unwrap());
        assert!(channels.closed.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn supervisor_exits_when_done() {
        let source: Arc<dyn WatchSource> = Arc::new(PollingWatcher::new());
        let channels = source.channels();
        let (done_tx, done_rx) = bounded::<()>(1);

        let join =
            spawn_supervisor(SignalHandler::unregistered(), Arc::clone(&source), done_rx).unwrap();
        drop(done_tx);

        assert!(!join.join().unwrap());
        assert!(channels.closed.try_recv().is_err());
    }
}
