//! Native watch source backed by the `notify` crate (inotify, FSEvents,
//! ReadDirectoryChangesW, kqueue).
//!
//! OS backends report changes on the child path only. To keep the event
//! loop backend-agnostic, a create, remove or rename of a file directly inside
//! a watched root also produces a synthetic `Write` on the root directory,
//! matching what the polling source reports when the directory mtime moves.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, select, unbounded};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};

use crate::core::config::WatchBackend;
use crate::core::errors::{KeepnError, Result};
use crate::watcher::{FilterHook, Op, Outlets, WatchChannels, WatchEvent, WatchSource};

/// OS-notification watch source. The interval passed to `start` is validated
/// but otherwise unused.
pub struct NativeWatcher {
    watcher: Mutex<RecommendedWatcher>,
    raw_rx: Receiver<notify::Result<Event>>,
    roots: Mutex<Vec<PathBuf>>,
    filter: RwLock<Option<FilterHook>>,
    outlets: Outlets,
}

impl NativeWatcher {
    pub fn new() -> Result<Self> {
        let (raw_tx, raw_rx) = unbounded();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| KeepnError::WatchSource {
            details: format!("cannot initialise native watcher: {e}"),
        })?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            raw_rx,
            roots: Mutex::new(Vec::new()),
            filter: RwLock::new(None),
            outlets: Outlets::new(),
        })
    }

    /// Translate one backend notification into zero or more watch events.
    fn translate(&self, event: &Event) -> Vec<WatchEvent> {
        let Some(op) = map_kind(event.kind) else {
            return Vec::new();
        };
        let roots = self.roots.lock().clone();
        let filter = self.filter.read().clone();
        let mut out = Vec::new();

        for path in &event.paths {
            if roots.contains(path) {
                out.push(WatchEvent::new(op, path.clone(), is_dir_hint(event.kind, path)));
                continue;
            }

            let is_dir = is_dir_hint(event.kind, path);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let allowed = filter.as_ref().is_none_or(|hook| hook(&name, path));
            if allowed {
                out.push(WatchEvent::new(op, path.clone(), is_dir));
            }

            if !is_dir
                && matches!(op, Op::Create | Op::Remove | Op::Rename)
                && let Some(parent) = path.parent()
                && roots.iter().any(|root| root == parent)
            {
                let synthetic = WatchEvent::new(Op::Write, parent.to_path_buf(), true);
                if !out.contains(&synthetic) {
                    out.push(synthetic);
                }
            }
        }
        out
    }

    fn emit(&self, event: WatchEvent) -> bool {
        select! {
            send(self.outlets.events_tx, event) -> res => res.is_ok(),
            recv(self.outlets.close_rx) -> _ => false,
        }
    }

    fn unwatch_all(&self) {
        let roots = self.roots.lock().clone();
        let mut watcher = self.watcher.lock();
        for root in roots {
            let _ = watcher.unwatch(&root);
        }
    }
}

impl WatchSource for NativeWatcher {
    fn add(&self, path: &Path) -> Result<()> {
        let registration = |details: String| KeepnError::WatchRegistration {
            path: path.to_path_buf(),
            details,
        };
        let path = std::path::absolute(path).map_err(|e| registration(e.to_string()))?;
        fs::metadata(&path).map_err(|e| registration(e.to_string()))?;

        let mut roots = self.roots.lock();
        if roots.contains(&path) {
            return Ok(());
        }
        self.watcher
            .lock()
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| registration(e.to_string()))?;
        roots.push(path);
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

        'run: loop {
            select! {
                recv(self.outlets.close_rx) -> _ => break 'run,
                recv(self.raw_rx) -> msg => match msg {
                    Ok(Ok(event)) => {
                        for translated in self.translate(&event) {
                            if !self.emit(translated) {
                                break 'run;
                            }
                        }
                    }
                    Ok(Err(e)) => self.outlets.report_error(KeepnError::WatchSource {
                        details: e.to_string(),
                    }),
                    Err(_) => {
                        self.outlets.report_error(KeepnError::ChannelClosed {
                            component: "native watcher",
                        });
                        break 'run;
                    }
                },
            }
        }

        self.unwatch_all();
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
        WatchBackend::Native
    }
}

fn map_kind(kind: EventKind) -> Option<Op> {
    match kind {
        EventKind::Create(_) => Some(Op::Create),
        EventKind::Remove(_) => Some(Op::Remove),
        EventKind::Modify(ModifyKind::Name(_)) => Some(Op::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(Op::Chmod),
        EventKind::Modify(_) => Some(Op::Write),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn is_dir_hint(kind: EventKind, path: &Path) -> bool {
    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => true,
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => false,
        _ => fs::symlink_metadata(path).is_ok_and(|m| m.is_dir()),
    }
}
