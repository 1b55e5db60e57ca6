//! Retention pruner: list, select, order, and delete beyond the keep window.

pub mod retention;

pub use retention::{FileEntry, PrunePlan, PruneReport, RetentionPolicy, list_entries, prune};
