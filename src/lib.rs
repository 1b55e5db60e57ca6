#![forbid(unsafe_code)]

//! keepn: a retention daemon that watches directories and keeps only the
//! newest N files whose names match a pattern.
//!
//! Three pieces:
//! 1. **Watch sources** ([`watcher`]): polling snapshot diff or OS notifications,
//!    delivering events, errors and a closed signal over channels
//! 2. **Retention pruner** ([`pruner`]): list, rank by mtime, delete past the window
//! 3. **Event loop** ([`daemon`]): prunes a directory whenever it reports a change
//!
//! # Library usage
//!
//! ```rust,no_run
//! use keepn::prelude::*;
//!
//! let policy = RetentionPolicy::new(regex::Regex::new(r"\.log$").unwrap(), 3);
//! let report = policy.prune(std::path::Path::new("/var/log/app")).unwrap();
//! println!("deleted {} files", report.deleted.len());
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod pruner;
pub mod watcher;
