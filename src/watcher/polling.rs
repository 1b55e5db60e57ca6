//! Polling watch source: periodic snapshot of each watched root and its direct
//! children, diffed against the previous snapshot.
//!
//! A root directory is always part of its own snapshot, so adding or removing
//! a child (which bumps the directory mtime) surfaces as a `Write` event with
//! `is_dir = true`. Children are subject to the filter hook; the root is not.
//!
//! Per cycle, events are emitted in this order: removals, creations, then
//! writes and permission changes, each group in path order.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crossbeam_channel::select;
use parking_lot::{Mutex, RwLock};

use crate::core::config::WatchBackend;
use crate::core::errors::{KeepnError, Result};
use crate::watcher::{FilterHook, Op, Outlets, WatchChannels, WatchEvent, WatchSource};

/// Attributes compared between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileState {
    modified: SystemTime,
    len: u64,
    is_dir: bool,
    readonly: bool,
    #[cfg(unix)]
    mode: u32,
}

impl FileState {
    fn from_metadata(meta: &Metadata) -> Self {
        #[cfg(unix)]
        use std::os::unix::fs::PermissionsExt;

        Self {
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            len: meta.len(),
            is_dir: meta.is_dir(),
            readonly: meta.permissions().readonly(),
            #[cfg(unix)]
            mode: meta.permissions().mode(),
        }
    }

    fn content_changed(&self, newer: &Self) -> bool {
        self.modified != newer.modified || (!self.is_dir && self.len != newer.len)
    }

    fn permissions_changed(&self, newer: &Self) -> bool {
        #[cfg(unix)]
        if self.mode != newer.mode {
            return true;
        }
        self.readonly != newer.readonly
    }
}

type Snapshot = BTreeMap<PathBuf, FileState>;

/// Interval-driven watch source.
pub struct PollingWatcher {
    roots: Mutex<Vec<PathBuf>>,
    files: Mutex<Snapshot>,
    filter: RwLock<Option<FilterHook>>,
    outlets: Outlets,
}

impl PollingWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            roots: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeMap::new()),
            filter: RwLock::new(None),
            outlets: Outlets::new(),
        }
    }

    /// Run one snapshot-and-diff cycle. Returns `false` if a close request
    /// arrived while events were being delivered.
    pub fn poll_once(&self) -> bool {
        let roots = self.roots.lock().clone();
        let mut fresh = Snapshot::new();
        let mut vanished = Vec::new();

        for root in &roots {
            match self.list(root) {
                Ok(listing) => fresh.extend(listing),
                Err(e) if e.kind() == ErrorKind::NotFound => vanished.push(root.clone()),
                Err(e) => self.outlets.report_error(KeepnError::WatchSource {
                    details: format!("cannot poll {}: {e}", root.display()),
                }),
            }
        }

        if !vanished.is_empty() {
            self.roots.lock().retain(|root| !vanished.contains(root));
            for root in &vanished {
                eprintln!(
                    "[KPN-WATCH] watched path {} disappeared, no longer watching it",
                    root.display()
                );
            }
        }

        let events = {
            let mut files = self.files.lock();
            // Roots that failed for reasons other than removal keep their old
            // entries, so a transient error does not read as mass deletion.
            for (path, state) in files.iter() {
                let owned_by_failed_root = roots.iter().any(|root| {
                    !vanished.contains(root) && !fresh.contains_key(root) && path.starts_with(root)
                });
                if owned_by_failed_root {
                    fresh.insert(path.clone(), *state);
                }
            }
            let events = diff(&files, &fresh);
            *files = fresh;
            events
        };

        for event in events {
            if !self.emit(event) {
                return false;
            }
        }
        true
    }

    /// The root itself plus its filtered direct children.
    fn list(&self, root: &Path) -> std::io::Result<Snapshot> {
        let mut listing = Snapshot::new();
        let meta = fs::metadata(root)?;
        listing.insert(root.to_path_buf(), FileState::from_metadata(&meta));
        if !meta.is_dir() {
            return Ok(listing);
        }

        let filter = self.filter.read().clone();
        for item in fs::read_dir(root)? {
            let item = match item {
                Ok(item) => item,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let path = item.path();
            let name = item.file_name();
            if let Some(hook) = &filter
                && !hook(&name.to_string_lossy(), &path)
            {
                continue;
            }
            match item.metadata() {
                Ok(meta) => {
                    listing.insert(path, FileState::from_metadata(&meta));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(listing)
    }

    /// Deliver one event, giving up if the source is closed meanwhile.
    fn emit(&self, event: WatchEvent) -> bool {
        select! {
            send(self.outlets.events_tx, event) -> res => res.is_ok(),
            recv(self.outlets.close_rx) -> _ => false,
        }
    }
}

impl Default for PollingWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchSource for PollingWatcher {
    fn add(&self, path: &Path) -> Result<()> {
        let path = std::path::absolute(path).map_err(|e| KeepnError::WatchRegistration {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        let listing = self
            .list(&path)
            .map_err(|e| KeepnError::WatchRegistration {
                path: path.clone(),
                details: e.to_string(),
            })?;

        let mut roots = self.roots.lock();
        if !roots.contains(&path) {
            roots.push(path);
        }
        self.files.lock().extend(listing);
        Ok(())
    }

    fn set_filter(&self, hook: FilterHook) {
        *self.filter.write() = Some(hook);
    }

    fn channels(&self) -> WatchChannels {
        self.outlets.channels()
    }

    fn start(&self, interval: Duration) -> Result<()> {
        if !self.outlets.begin(interval)? {
            return Ok(());
        }

        loop {
            select! {
                recv(self.outlets.close_rx) -> _ => break,
                default(interval) => {
                    if !self.poll_once() {
                        break;
                    }
                }
            }
        }

        self.outlets.finish();
        Ok(())
    }

    fn close(&self) {
        self.outlets.request_close();
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        self.roots.lock().clone()
    }

    fn backend(&self) -> WatchBackend {
        WatchBackend::Poll
    }
}

/// Events turning `old` into `new`: removals, creations, then modifications.
fn diff(old: &Snapshot, new: &Snapshot) -> Vec<WatchEvent> {
    let mut removed = Vec::new();
    let mut created = Vec::new();
    let mut changed = Vec::new();

    for (path, before) in old {
        match new.get(path) {
            None => removed.push(WatchEvent::new(Op::Remove, path.clone(), before.is_dir)),
            Some(after) if before.content_changed(after) => {
                changed.push(WatchEvent::new(Op::Write, path.clone(), after.is_dir));
            }
            Some(after) if before.permissions_changed(after) => {
                changed.push(WatchEvent::new(Op::Chmod, path.clone(), after.is_dir));
            }
            Some(_) => {}
        }
    }
    for (path, after) in new {
        if !old.contains_key(path) {
            created.push(WatchEvent::new(Op::Create, path.clone(), after.is_dir));
        }
    }

    removed.extend(created);
    removed.extend(changed);
    removed
}
