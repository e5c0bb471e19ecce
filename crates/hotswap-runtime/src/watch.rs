//! File change watches for source libraries
//!
//! A [`WatchRegistry`] owns a single notifier for all modules of a
//! coordinator. Each [`FileWatch`] registers one source file; the parent
//! directory is watched once no matter how many sources live in it, and an
//! event raises the dirty flag of every registration for that file name.
//! The notifier thread touches nothing but the flags.

use hotswap_config::{WatchBackend, WatchConfig};
use hotswap_core::{Error, Result};
use notify::{
    event::{MetadataKind, ModifyKind, RenameMode},
    Event, EventHandler, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Registrations keyed by watched directory
type Routes = Arc<RwLock<HashMap<PathBuf, Vec<Registration>>>>;

struct Registration {
    id: u64,
    file_name: OsString,
    dirty: Arc<AtomicBool>,
}

struct Shared {
    config: WatchConfig,
    // Created on first install. Also serializes install and removal.
    watcher: Mutex<Option<Box<dyn Watcher + Send>>>,
    routes: Routes,
    next_id: AtomicU64,
}

/// Shared notifier routing file events to per-module dirty flags
#[derive(Clone)]
pub struct WatchRegistry {
    shared: Arc<Shared>,
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("backend", &self.shared.config.backend)
            .field("directories", &self.shared.routes.read().len())
            .finish()
    }
}

impl WatchRegistry {
    /// Create a registry; no notifier runs until the first install
    pub fn new(config: WatchConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                watcher: Mutex::new(None),
                routes: Arc::new(RwLock::new(HashMap::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start watching `source`, setting `dirty` on every relevant change
    ///
    /// The parent directory must exist; the file itself need not.
    pub fn install(&self, source: &Path, dirty: Arc<AtomicBool>) -> Result<FileWatch> {
        let (directory, file_name) = split_source(source)?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let mut watcher = self.shared.watcher.lock();

        let first_in_directory = {
            let mut routes = self.shared.routes.write();
            let registrations = routes.entry(directory.clone()).or_default();
            registrations.push(Registration {
                id,
                file_name: file_name.clone(),
                dirty,
            });
            registrations.len() == 1
        };

        if first_in_directory {
            let started = match &mut *watcher {
                Some(running) => Ok(running),
                slot @ None => self.create_watcher(&directory).map(|w| slot.insert(w)),
            }
            .and_then(|running| {
                running
                    .watch(&directory, RecursiveMode::NonRecursive)
                    .map_err(|e| Error::watch(&directory, e))
            });

            if let Err(e) = started {
                self.shared.remove_route(&directory, id);
                return Err(e);
            }
        }

        debug!(
            directory = %directory.display(),
            file = %file_name.to_string_lossy(),
            backend = ?self.shared.config.backend,
            shared = !first_in_directory,
            "File watch installed"
        );

        Ok(FileWatch {
            shared: Arc::clone(&self.shared),
            id,
            directory,
            file_name,
        })
    }

    /// Number of active registrations for `source`
    pub fn watch_count(&self, source: &Path) -> usize {
        let Ok((directory, file_name)) = split_source(source) else {
            return 0;
        };

        self.shared
            .routes
            .read()
            .get(&directory)
            .map_or(0, |registrations| {
                registrations
                    .iter()
                    .filter(|r| r.file_name == file_name)
                    .count()
            })
    }

    /// Number of directories under watch
    pub fn watched_directories(&self) -> usize {
        self.shared.routes.read().len()
    }

    fn create_watcher(&self, directory: &Path) -> Result<Box<dyn Watcher + Send>> {
        let handler = RoutingHandler {
            routes: Arc::clone(&self.shared.routes),
        };
        let config = &self.shared.config;

        let watcher: Box<dyn Watcher + Send> = match config.backend {
            WatchBackend::Native => Box::new(
                RecommendedWatcher::new(handler, notify::Config::default())
                    .map_err(|e| Error::watch(directory, e))?,
            ),
            WatchBackend::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(config.poll_interval),
                )
                .map_err(|e| Error::watch(directory, e))?,
            ),
        };

        debug!(backend = ?config.backend, "File notifier started");
        Ok(watcher)
    }
}

impl Shared {
    /// Drop registration `id`; true when `directory` has none left
    fn remove_route(&self, directory: &Path, id: u64) -> bool {
        let mut routes = self.routes.write();
        let Some(registrations) = routes.get_mut(directory) else {
            return false;
        };

        registrations.retain(|r| r.id != id);
        if registrations.is_empty() {
            routes.remove(directory);
            true
        } else {
            false
        }
    }
}

/// Canonical parent directory and file name of a source path
fn split_source(source: &Path) -> Result<(PathBuf, OsString)> {
    let file_name = source
        .file_name()
        .ok_or_else(|| Error::watch(source, "path has no file name"))?
        .to_os_string();

    let parent = match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let directory = parent
        .canonicalize()
        .map_err(|e| Error::watch(parent, e))?;

    Ok((directory, file_name))
}

/// Active watch on one source library
///
/// Dropping it removes the registration; the directory stops being watched
/// once its last registration is gone.
pub struct FileWatch {
    shared: Arc<Shared>,
    id: u64,
    directory: PathBuf,
    file_name: OsString,
}

impl fmt::Debug for FileWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatch")
            .field("directory", &self.directory)
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl FileWatch {
    /// Watched directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Watched file name
    pub fn file_name(&self) -> &OsStr {
        &self.file_name
    }

    /// Stop raising events for this source
    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        let mut watcher = self.shared.watcher.lock();

        if self.shared.remove_route(&self.directory, self.id) {
            if let Some(watcher) = watcher.as_mut() {
                if let Err(e) = watcher.unwatch(&self.directory) {
                    trace!(directory = %self.directory.display(), error = %e, "Unwatch failed");
                }
            }
        }

        debug!(
            directory = %self.directory.display(),
            file = %self.file_name.to_string_lossy(),
            "File watch removed"
        );
    }
}

struct RoutingHandler {
    routes: Routes,
}

impl EventHandler for RoutingHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "File watcher error");
                return;
            }
        };

        if !is_relevant(&event.kind) {
            return;
        }

        let routes = self.routes.read();
        for path in &event.paths {
            let (Some(directory), Some(file_name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            let Some(registrations) = routes.get(directory) else {
                continue;
            };

            for registration in registrations
                .iter()
                .filter(|r| r.file_name.as_os_str() == file_name)
            {
                trace!(path = %path.display(), kind = ?event.kind, "Source library changed");
                registration.dirty.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Whether an event of `kind` is a write, replacement or restoration
fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any
            | EventKind::Create(_)
            | EventKind::Modify(
                ModifyKind::Any
                    | ModifyKind::Data(_)
                    | ModifyKind::Metadata(MetadataKind::Any | MetadataKind::WriteTime)
                    | ModifyKind::Name(RenameMode::To | RenameMode::Both | RenameMode::Any)
            )
    )
}
