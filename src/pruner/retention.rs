//! Retention pruning: keep the newest `keep` matching files of one directory.
//!
//! Pipeline for one pass: list directory (non-recursive, name order)
//! -> select non-directory entries whose name matches the pattern
//! -> stable sort by modification time, newest first
//! -> retain ranks `[0, keep)` -> delete ranks `[keep, end)` in sorted order.
//!
//! A listing failure aborts the pass. A removal failure is recorded in the
//! report and the remaining removals are still attempted; callers that want
//! fail-on-first semantics use [`PruneReport::into_result`].

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use regex::Regex;

use crate::core::config::{Config, compile_pattern};
use crate::core::errors::{KeepnError, Result};

// ──────────────────── entries ────────────────────

/// One directory entry as seen at listing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File name (lossy UTF-8), the string the pattern is matched against.
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// List the direct children of `dir`, ordered by file name.
///
/// Metadata is read without following symlinks. Entries removed between
/// enumeration and the metadata read are skipped.
pub fn list_entries(dir: &Path) -> Result<Vec<FileEntry>> {
    let list_err = |source| KeepnError::ListDirectory {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for item in fs::read_dir(dir).map_err(list_err)? {
        let item = item.map_err(list_err)?;
        let meta = match item.metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(list_err(e)),
        };
        entries.push(FileEntry {
            name: item.file_name().to_string_lossy().into_owned(),
            path: item.path(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
        });
    }

    // read_dir order is filesystem-dependent; name order makes ties deterministic.
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

// ──────────────────── policy ────────────────────

/// Pattern plus retention window.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pattern: Regex,
    keep: usize,
}

/// Decision for one pass: which entries survive and which go, both newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub retain: Vec<FileEntry>,
    pub delete: Vec<FileEntry>,
}

impl RetentionPolicy {
    #[must_use]
    pub fn new(pattern: Regex, keep: usize) -> Self {
        Self { pattern, keep }
    }

    /// Build from `watch.file_pattern` and `retention.num_files`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            compile_pattern(&config.watch.file_pattern)?,
            config.retention.num_files,
        ))
    }

    #[must_use]
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    #[must_use]
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Substring match: the pattern need not cover the whole name.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// The match set: matching entries that are not directories, in input order.
    #[must_use]
    pub fn select(&self, entries: Vec<FileEntry>) -> Vec<FileEntry> {
        entries
            .into_iter()
            .filter(|entry| !entry.is_dir && self.matches(&entry.name))
            .collect()
    }

    /// Split the match set into retained and deleted entries.
    ///
    /// The sort is stable, so entries with equal timestamps keep their input
    /// order (name order when fed from [`list_entries`]).
    #[must_use]
    pub fn plan(&self, entries: Vec<FileEntry>) -> PrunePlan {
        let mut matched = self.select(entries);
        matched.sort_by(|a, b| b.modified.cmp(&a.modified));
        let delete = if matched.len() > self.keep {
            matched.split_off(self.keep)
        } else {
            Vec::new()
        };
        PrunePlan {
            retain: matched,
            delete,
        }
    }

    /// Run one pruning pass over `dir`.
    pub fn prune(&self, dir: &Path) -> Result<PruneReport> {
        let start = Instant::now();
        let plan = self.plan(list_entries(dir)?);
        let mut report = plan.execute(dir);
        report.duration = start.elapsed();
        Ok(report)
    }
}

impl PrunePlan {
    /// Remove the `delete` entries in order, recording each failure and
    /// carrying on with the rest.
    #[must_use]
    pub fn execute(self, dir: &Path) -> PruneReport {
        let start = Instant::now();
        let mut report = PruneReport {
            directory: dir.to_path_buf(),
            matched: self.retain.len() + self.delete.len(),
            retained: self.retain.into_iter().map(|e| e.path).collect(),
            deleted: Vec::new(),
            failures: Vec::new(),
            duration: Duration::ZERO,
        };

        for entry in self.delete {
            match fs::remove_file(&entry.path) {
                Ok(()) => report.deleted.push(entry.path),
                Err(source) => report.failures.push(KeepnError::RemoveFile {
                    path: entry.path,
                    source,
                }),
            }
        }

        report.duration = start.elapsed();
        report
    }
}

/// Prune `dir` with an explicit pattern and window.
pub fn prune(dir: &Path, pattern: &Regex, keep: usize) -> Result<PruneReport> {
    RetentionPolicy::new(pattern.clone(), keep).prune(dir)
}

// ──────────────────── report ────────────────────

/// Outcome of one pruning pass.
#[derive(Debug)]
pub struct PruneReport {
    pub directory: PathBuf,
    /// Size of the match set before deletion.
    pub matched: usize,
    /// Survivors, newest first.
    pub retained: Vec<PathBuf>,
    /// Removed files, in removal order.
    pub deleted: Vec<PathBuf>,
    /// `RemoveFile` errors for entries that could not be removed.
    pub failures: Vec<KeepnError>,
    pub duration: Duration,
}

impl PruneReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into the first removal failure, if any.
    pub fn into_result(mut self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(self.failures.remove(0))
        }
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_mtime};
    use std::collections::BTreeSet;

    const T: i64 = 1_700_000_000;

    fn touch(dir: &Path, name: &str, mtime: i64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, name).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
        path
    }

    fn names(dir: &Path) -> BTreeSet<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn log_policy(keep: usize) -> RetentionPolicy {
        RetentionPolicy::new(Regex::new(r"\.log$").unwrap(), keep)
    }

    fn three_logs(dir: &Path) {
        touch(dir, "a.log", T);
        touch(dir, "b.log", T + 10);
        touch(dir, "c.log", T + 20);
    }

    fn entry(name: &str, secs: u64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: PathBuf::from("/logs").join(name),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            is_dir: false,
        }
    }

    #[test]
    fn keeps_two_newest_of_three() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());

        let report = log_policy(2).prune(dir.path()).unwrap();

        assert_eq!(report.matched, 3);
        assert_eq!(report.deleted, vec![dir.path().join("a.log")]);
        assert_eq!(
            report.retained,
            vec![dir.path().join("c.log"), dir.path().join("b.log")]
        );
        assert!(report.is_clean());
        assert_eq!(
            names(dir.path()),
            BTreeSet::from(["b.log".to_string(), "c.log".to_string()])
        );
    }

    #[test]
    fn over_provisioned_keep_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());

        let report = log_policy(5).prune(dir.path()).unwrap();

        assert!(report.deleted.is_empty());
        assert_eq!(report.retained.len(), 3);
        assert_eq!(names(dir.path()).len(), 3);
    }

    #[test]
    fn zero_keep_deletes_every_match_but_not_others() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());
        touch(dir.path(), "notes.txt", T - 100);

        let report = log_policy(0).prune(dir.path()).unwrap();

        assert_eq!(report.deleted.len(), 3);
        assert!(report.retained.is_empty());
        assert_eq!(names(dir.path()), BTreeSet::from(["notes.txt".to_string()]));
    }

    #[test]
    fn deletion_follows_recency_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "x.log", T + 5);
        touch(dir.path(), "y.log", T + 30);
        touch(dir.path(), "z.log", T);
        touch(dir.path(), "w.log", T + 40);

        let report = log_policy(1).prune(dir.path()).unwrap();

        assert_eq!(
            report.deleted,
            vec![
                dir.path().join("y.log"),
                dir.path().join("x.log"),
                dir.path().join("z.log"),
            ]
        );
    }

    #[test]
    fn subdirectories_are_never_touched() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());
        fs::create_dir(dir.path().join("archive.log")).unwrap();

        let report = log_policy(0).prune(dir.path()).unwrap();

        assert_eq!(report.matched, 3);
        assert!(dir.path().join("archive.log").is_dir());
    }

    #[test]
    fn empty_match_set_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "readme.md", T);

        let report = log_policy(0).prune(dir.path()).unwrap();

        assert_eq!(report.matched, 0);
        assert!(report.deleted.is_empty());
        assert!(dir.path().join("readme.md").exists());
    }

    #[test]
    fn second_pass_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());
        touch(dir.path(), "d.log", T + 30);

        log_policy(2).prune(dir.path()).unwrap();
        let after_first = names(dir.path());
        let second = log_policy(2).prune(dir.path()).unwrap();

        assert!(second.deleted.is_empty());
        assert_eq!(names(dir.path()), after_first);
    }

    #[test]
    fn pattern_matches_substrings() {
        let policy = RetentionPolicy::new(Regex::new("app").unwrap(), 1);
        assert!(policy.matches("myapp-2024.log"));
        assert!(!policy.matches("other.log"));
    }

    #[test]
    fn missing_directory_is_a_listing_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");

        let err = log_policy(1).prune(&gone).expect_err("listing must fail");

        assert!(matches!(err, KeepnError::ListDirectory { .. }));
        assert_eq!(err.code(), "KPN-3001");
    }

    #[test]
    fn equal_timestamps_keep_name_order() {
        let policy = RetentionPolicy::new(Regex::new(".*").unwrap(), 2);
        let plan = policy.plan(vec![
            entry("a", 100),
            entry("b", 100),
            entry("c", 100),
            entry("d", 50),
        ]);
        let kept: Vec<&str> = plan.retain.iter().map(|e| e.name.as_str()).collect();
        let gone: Vec<&str> = plan.delete.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(kept, ["a", "b"]);
        assert_eq!(gone, ["c", "d"]);
    }

    #[test]
    fn list_entries_is_name_ordered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "c", "a"] {
            touch(dir.path(), name, T);
        }
        let listed: Vec<String> = list_entries(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(listed, ["a", "b", "c"]);
    }

    #[test]
    fn into_result_surfaces_first_failure() {
        let report = PruneReport {
            directory: PathBuf::from("/logs"),
            matched: 2,
            retained: Vec::new(),
            deleted: Vec::new(),
            failures: vec![
                KeepnError::RemoveFile {
                    path: PathBuf::from("/logs/a.log"),
                    source: std::io::Error::from(ErrorKind::PermissionDenied),
                },
                KeepnError::RemoveFile {
                    path: PathBuf::from("/logs/b.log"),
                    source: std::io::Error::from(ErrorKind::PermissionDenied),
                },
            ],
            duration: Duration::ZERO,
        };
        let err = report.into_result().expect_err("failures present");
        assert!(err.to_string().contains("/logs/a.log"));
    }

    #[test]
    fn removal_failure_is_recorded_and_pass_continues() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());
        touch(dir.path(), "d.log", T + 30);
        let policy = log_policy(1);
        let plan = policy.plan(list_entries(dir.path()).unwrap());

        // b.log turns into a non-empty directory between planning and removal.
        let blocked = dir.path().join("b.log");
        fs::remove_file(&blocked).unwrap();
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("inner"), "x").unwrap();

        let report = plan.execute(dir.path());

        assert_eq!(
            report.deleted,
            vec![dir.path().join("c.log"), dir.path().join("a.log")]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code(), "KPN-3002");
        assert!(report.failures[0].to_string().contains("b.log"));
        assert!(!report.is_clean());
        assert_eq!(names(dir.path()), BTreeSet::from(["b.log".to_string(), "d.log".to_string()]));

        let err = report.into_result().expect_err("failure present");
        assert_eq!(err.code(), "KPN-3002");
    }

    #[test]
    fn free_function_matches_policy() {
        let dir = tempfile::tempdir().unwrap();
        three_logs(dir.path());
        let report = prune(dir.path(), &Regex::new(r"\.log$").unwrap(), 2).unwrap();
        assert_eq!(report.deleted, vec![dir.path().join("a.log")]);
    }
}
