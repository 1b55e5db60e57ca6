//! Daemon subsystem: the event loop, signal supervision and the runner that
//! ties them to a watch source.

pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod runner;
#[cfg(feature = "daemon")]
pub mod signals;
