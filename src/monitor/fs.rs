//! Observer for file-system changes in the data directory.
//!
//! Runs a recursive `notify` watcher on the monitor thread and forwards the
//! relevant events to the [`RegistryUpdater`]. The event channel is polled
//! with a short timeout so the stop flag is checked at least once a second.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};

use super::RegistryUpdater;
use crate::registry::DataRegistry;

pub struct DataDirectoryObserver {
    data_dir: PathBuf,
    updater: RegistryUpdater,
}

impl DataDirectoryObserver {
    pub fn new(data_dir: &Path, registry: Arc<RwLock<DataRegistry>>) -> Self {
        let data_dir = data_dir.canonicalize().unwrap_or_else(|_| data_dir.to_path_buf());
        let updater = RegistryUpdater::new(&data_dir, registry);
        Self { data_dir, updater }
    }

    /// Watches the data directory until the stop flag is raised. Watcher
    /// failures are logged; the registry simply stops receiving updates.
    pub fn observe(&self, stop: &AtomicBool) {
        let (event_tx, event_rx) = channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        });

        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::error!("Failed to create the file-system watcher: {e}");
                return;
            }
        };

        if let Err(e) = watcher.watch(&self.data_dir, RecursiveMode::Recursive) {
            tracing::error!("Failed to watch {}: {e}", self.data_dir.display());
            return;
        }

        tracing::info!("Observing directory for changes: {}", self.data_dir.display());

        while !stop.load(Ordering::Relaxed) {
            match event_rx.recv_timeout(Duration::from_secs(1)) {
                Ok(Ok(event)) => self.handle_event(event),
                Ok(Err(e)) => tracing::warn!("File-system watcher error: {e}"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::info!("File-system observer stopped");
    }

    fn handle_event(&self, event: Event) {
        tracing::debug!("File-system event: {:?} {:?}", event.kind, event.paths);

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
                for path in &event.paths {
                    if path.is_file() {
                        self.updater.on_new_file(path);
                    } else if path.is_dir() {
                        self.updater.materialise_dir(path);
                    }
                }
            }
            EventKind::Remove(kind) => {
                for path in &event.paths {
                    self.handle_removal(path, kind);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.handle_rename(&event.paths, mode),
            _ => {}
        }
    }

    fn handle_removal(&self, path: &Path, kind: RemoveKind) {
        match kind {
            RemoveKind::File => self.updater.on_removed_file(path),
            RemoveKind::Folder => self.updater.on_removed_dir(path),
            // The backend did not say; the path is gone, so decide from the
            // data-directory grammar (files of interest carry a suffix).
            _ => {
                if looks_like_file(path) {
                    self.updater.on_removed_file(path);
                } else {
                    self.updater.on_removed_dir(path);
                }
            }
        }
    }

    fn handle_rename(&self, paths: &[PathBuf], mode: RenameMode) {
        match mode {
            RenameMode::Both if paths.len() >= 2 => {
                let (src, dest) = (&paths[0], &paths[1]);
                if dest.is_dir() {
                    self.updater.on_moved_dir(src, dest);
                } else {
                    self.updater.on_removed_file(src);
                    self.updater.on_new_file(dest);
                }
            }
            RenameMode::From => {
                for path in paths {
                    if looks_like_file(path) {
                        self.updater.on_removed_file(path);
                    } else {
                        self.updater.on_removed_dir(path);
                    }
                }
            }
            RenameMode::To => {
                for path in paths {
                    if path.is_dir() {
                        self.updater.materialise_dir(path);
                    } else {
                        self.updater.on_new_file(path);
                    }
                }
            }
            _ => {}
        }
    }
}

fn looks_like_file(path: &Path) -> bool {
    path.extension().is_some()
}
