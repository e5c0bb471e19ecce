//! Reload coordinator
//!
//! Owns every module handle and drives the copy, load, bind and watch
//! sequence. Callers never receive a stored pointer: [`ReloadCoordinator::resolve`]
//! hands out a [`BoundSymbol`] that pins the current handle until dropped.

use crate::backend::{LibraryBackend, NativeBackend};
use crate::event::{PollReport, ReloadEvent, ReloadTrigger};
use crate::handle::{ModuleHandle, ModuleState};
use crate::staging::StagingArea;
use crate::symbol::BoundSymbol;
use crate::watch::{FileWatch, WatchRegistry};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hotswap_config::RuntimeConfig;
use hotswap_core::{Error, ModuleDescriptor, ModuleSource, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Capacity of the reload event channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Snapshot of one module for reporting
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    /// Module id
    pub id: String,

    /// Source library path
    pub source_path: PathBuf,

    /// Current state
    #[serde(flatten)]
    pub state: ModuleState,

    /// Staged copy currently mapped
    pub staging_path: Option<PathBuf>,

    /// When the current library was mapped
    pub loaded_at: Option<DateTime<Utc>>,

    /// Declared symbols with a live binding
    pub bound_symbols: Vec<String>,

    /// Declared symbols the library does not export
    pub missing_symbols: Vec<String>,

    /// Whether a file change watch is active
    pub watched: bool,

    /// Successful loads, including the first
    pub reloads: u64,

    /// Failed load attempts
    pub failures: u64,
}

#[derive(Debug, Default)]
struct SlotStatus {
    loaded: bool,
    last_error: Option<String>,
    staging_path: Option<PathBuf>,
    loaded_at: Option<DateTime<Utc>>,
    bound_symbols: Vec<String>,
    missing_symbols: Vec<String>,
    watched: bool,
    reloads: u64,
    failures: u64,
}

/// Per-module state kept across reloads
///
/// The dirty flag outlives every handle generation so a standby watch can
/// keep raising it after a failed load.
#[derive(Debug)]
struct ModuleSlot {
    descriptor: RwLock<Arc<ModuleDescriptor>>,
    handle: Arc<RwLock<Option<ModuleHandle>>>,
    dirty: Arc<AtomicBool>,
    standby_watch: Mutex<Option<FileWatch>>,
    status: RwLock<SlotStatus>,
}

impl ModuleSlot {
    fn new(descriptor: Arc<ModuleDescriptor>) -> Self {
        Self {
            descriptor: RwLock::new(descriptor),
            handle: Arc::new(RwLock::new(None)),
            dirty: Arc::new(AtomicBool::new(false)),
            standby_watch: Mutex::new(None),
            status: RwLock::new(SlotStatus::default()),
        }
    }

    fn state(&self) -> ModuleState {
        let status = self.status.read();
        if status.loaded {
            if self.dirty.load(Ordering::SeqCst) {
                ModuleState::Dirty
            } else {
                ModuleState::Loaded
            }
        } else if let Some(error) = &status.last_error {
            ModuleState::Failed(error.clone())
        } else {
            ModuleState::Unloaded
        }
    }

    fn info(&self, id: &str) -> ModuleInfo {
        let state = self.state();
        let source_path = self.descriptor.read().source_path.clone();
        let status = self.status.read();

        ModuleInfo {
            id: id.to_string(),
            source_path,
            state,
            staging_path: status.staging_path.clone(),
            loaded_at: status.loaded_at,
            bound_symbols: status.bound_symbols.clone(),
            missing_symbols: status.missing_symbols.clone(),
            watched: status.watched || self.standby_watch.lock().is_some(),
            reloads: status.reloads,
            failures: status.failures,
        }
    }
}

/// Coordinates loading, reloading and lookup of native modules
pub struct ReloadCoordinator {
    config: RuntimeConfig,
    backend: Arc<dyn LibraryBackend>,
    staging: StagingArea,
    watches: WatchRegistry,
    modules: DashMap<String, Arc<ModuleSlot>>,
    poll_lock: Mutex<()>,
    events: broadcast::Sender<ReloadEvent>,
}

impl fmt::Debug for ReloadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadCoordinator")
            .field("backend", &self.backend)
            .field("staging", &self.staging)
            .field("watches", &self.watches)
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl ReloadCoordinator {
    /// Create a coordinator loading real shared libraries
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_backend(config, Arc::new(NativeBackend))
    }

    /// Create a coordinator with a custom loader backend
    pub fn with_backend(config: RuntimeConfig, backend: Arc<dyn LibraryBackend>) -> Self {
        let staging = StagingArea::new(config.staging_dir());
        let watches = WatchRegistry::new(config.watch.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            backend,
            staging,
            watches,
            modules: DashMap::new(),
            poll_lock: Mutex::new(()),
            events,
        }
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Staging area used for library copies
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Whether `module_id` is registered
    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    /// Subscribe to reload events
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    /// Register a new module or refresh a known one, loading it immediately
    ///
    /// A failed load leaves the module registered in the failed state; the
    /// error is returned and the next file change or [`mark_dirty`](Self::mark_dirty)
    /// retries.
    pub fn register_or_refresh(&self, descriptor: ModuleDescriptor) -> Result<()> {
        let id = descriptor.id.clone();
        let descriptor = Arc::new(descriptor);

        let slot = match self.modules.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let slot = Arc::clone(entry.get());
                *slot.descriptor.write() = descriptor;
                info!(module = %id, "Refreshing module declaration");
                slot
            }
            Entry::Vacant(entry) => {
                let slot = Arc::new(ModuleSlot::new(descriptor));
                entry.insert(Arc::clone(&slot));
                info!(module = %id, "Registering module");
                slot
            }
        };

        slot.dirty.store(false, Ordering::SeqCst);
        self.reload_slot(&id, &slot, ReloadTrigger::Registration)
    }

    /// Register or refresh every module a source declares
    ///
    /// Returns each module's load outcome; only a failure of the source
    /// itself is an error.
    pub fn discover<S>(&self, source: &S) -> Result<Vec<(String, Result<()>)>>
    where
        S: ModuleSource + ?Sized,
    {
        let descriptors = source.modules()?;
        debug!(count = descriptors.len(), "Discovered module declarations");

        Ok(descriptors
            .into_iter()
            .map(|descriptor| {
                let id = descriptor.id.clone();
                let outcome = self.register_or_refresh(descriptor);
                (id, outcome)
            })
            .collect())
    }

    /// Reload every module whose source changed since the last poll
    ///
    /// Not reentrant: a concurrent second call returns an empty report.
    pub fn poll(&self) -> PollReport {
        let mut report = PollReport::default();

        let Some(_polling) = self.poll_lock.try_lock() else {
            debug!("Poll already in progress, skipping");
            return report;
        };

        let mut slots: Vec<(String, Arc<ModuleSlot>)> = self
            .modules
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, slot) in slots {
            if !slot.dirty.swap(false, Ordering::SeqCst) {
                continue;
            }

            info!(module = %id, "Source changed, reloading");
            match self.reload_slot(&id, &slot, ReloadTrigger::FileChanged) {
                Ok(()) => report.reloaded.push(id),
                Err(Error::ReloadDeferred(_)) => report.deferred.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        report
    }

    /// Reload a module now, regardless of its dirty flag
    pub fn reload(&self, module_id: &str) -> Result<()> {
        let slot = self.slot(module_id)?;
        slot.dirty.store(false, Ordering::SeqCst);
        self.reload_slot(module_id, &slot, ReloadTrigger::Manual)
    }

    /// Unload a module, keeping its declaration
    ///
    /// The module stays registered without a watch until refreshed or
    /// reloaded.
    pub fn unload(&self, module_id: &str) -> Result<()> {
        let slot = self.slot(module_id)?;

        let mut current = slot
            .handle
            .try_write_for(self.config.reload_lock_timeout)
            .ok_or_else(|| Error::ReloadDeferred(module_id.to_string()))?;

        slot.standby_watch.lock().take();
        if let Some(mut handle) = current.take() {
            handle.unload();
        }
        slot.dirty.store(false, Ordering::SeqCst);

        let mut status = slot.status.write();
        *status = SlotStatus {
            reloads: status.reloads,
            failures: status.failures,
            ..SlotStatus::default()
        };

        info!(module = %module_id, "Module unloaded");
        Ok(())
    }

    /// Raise a module's dirty flag as if its source had changed
    pub fn mark_dirty(&self, module_id: &str) -> Result<()> {
        let slot = self.slot(module_id)?;
        slot.dirty.store(true, Ordering::SeqCst);
        debug!(module = %module_id, "Module marked dirty");
        Ok(())
    }

    /// Look up a bound symbol
    ///
    /// Unknown modules, unloaded modules, undeclared symbols and symbols the
    /// library does not export all yield [`Error::NotBound`]. Reloads of the
    /// module wait while the returned value is alive.
    pub fn resolve(&self, module_id: &str, symbol: &str) -> Result<BoundSymbol> {
        let slot = self
            .modules
            .get(module_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_bound(module_id, symbol))?;

        let guard = slot.handle.read_arc();
        let ptr = match (*guard).as_ref() {
            Some(handle) => handle.binding(symbol)?,
            None => return Err(Error::not_bound(module_id, symbol)),
        };

        Ok(BoundSymbol::new(guard, symbol, ptr))
    }

    /// Resolve a symbol as `F` and pass it to `call`
    ///
    /// # Safety
    ///
    /// `F` must match the exported function's real signature and calling
    /// convention.
    pub unsafe fn with_symbol<F, R>(
        &self,
        module_id: &str,
        symbol: &str,
        call: impl FnOnce(F) -> R,
    ) -> Result<R>
    where
        F: Copy,
    {
        let bound = self.resolve(module_id, symbol)?;
        // SAFETY: forwarded to the caller.
        let function = unsafe { bound.get::<F>()? };
        Ok(call(*function))
    }

    /// Current state of a module
    pub fn state(&self, module_id: &str) -> Option<ModuleState> {
        self.modules.get(module_id).map(|entry| entry.value().state())
    }

    /// Snapshot of one module
    pub fn module(&self, module_id: &str) -> Option<ModuleInfo> {
        self.modules
            .get(module_id)
            .map(|entry| entry.value().info(entry.key()))
    }

    /// Snapshots of every module, sorted by id
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let mut infos: Vec<ModuleInfo> = self
            .modules
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Unload every module and forget them
    ///
    /// A module whose bindings are still in use when the lock timeout expires
    /// is released by the last outstanding [`BoundSymbol`] instead.
    pub fn shutdown(&self) {
        let slots: Vec<(String, Arc<ModuleSlot>)> = self
            .modules
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        if slots.is_empty() {
            return;
        }

        info!(modules = slots.len(), "Shutting down reload coordinator");

        for (id, slot) in slots {
            slot.standby_watch.lock().take();

            match slot.handle.try_write_for(self.config.reload_lock_timeout) {
                Some(mut current) => {
                    if let Some(mut handle) = current.take() {
                        handle.unload();
                    }
                }
                None => warn!(
                    module = %id,
                    "Bindings still in use at shutdown, unload deferred to last user"
                ),
            }

            self.modules.remove(&id);
        }
    }

    fn slot(&self, module_id: &str) -> Result<Arc<ModuleSlot>> {
        self.modules
            .get(module_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownModule(module_id.to_string()))
    }

    /// Replace a slot's handle with a freshly loaded one
    fn reload_slot(&self, id: &str, slot: &ModuleSlot, trigger: ReloadTrigger) -> Result<()> {
        let Some(mut current) = slot.handle.try_write_for(self.config.reload_lock_timeout) else {
            slot.dirty.store(true, Ordering::SeqCst);
            warn!(
                module = %id,
                timeout = ?self.config.reload_lock_timeout,
                "Bindings in use, reload deferred"
            );
            return Err(Error::ReloadDeferred(id.to_string()));
        };

        let descriptor = Arc::clone(&*slot.descriptor.read());

        // New watch is live before the old generation is torn down.
        let watch = self
            .watches
            .install(descriptor.source_path(), Arc::clone(&slot.dirty));

        slot.standby_watch.lock().take();
        if let Some(mut previous) = current.take() {
            previous.unload();
        }
        slot.status.write().loaded = false;

        let loaded = ModuleHandle::load(Arc::clone(&descriptor), &*self.backend, &self.staging);

        match loaded {
            Ok(mut handle) => {
                match watch {
                    Ok(watch) => handle.attach_watch(watch),
                    Err(e) => warn!(module = %id, error = %e, "Module loaded without file watch"),
                }

                {
                    let mut status = slot.status.write();
                    status.loaded = true;
                    status.last_error = None;
                    status.staging_path = Some(handle.staging_path().to_path_buf());
                    status.loaded_at = Some(handle.loaded_at());
                    status.bound_symbols = handle.bound_symbols();
                    status.missing_symbols = handle.missing_symbols();
                    status.watched = handle.is_watched();
                    status.reloads += 1;
                }

                let event = ReloadEvent::loaded(id, trigger, handle.staging_path().to_path_buf());
                *current = Some(handle);
                drop(current);

                info!(module = %id, trigger = ?trigger, "Module reloaded successfully");
                let _ = self.events.send(event);
                Ok(())
            }
            Err(err) => {
                drop(current);

                // Keep watching so a rebuilt or restored source retries.
                match watch {
                    Ok(watch) => *slot.standby_watch.lock() = Some(watch),
                    Err(e) => debug!(module = %id, error = %e, "No standby watch for failed module"),
                }

                {
                    let mut status = slot.status.write();
                    status.last_error = Some(err.to_string());
                    status.staging_path = None;
                    status.loaded_at = None;
                    status.bound_symbols.clear();
                    status.missing_symbols = descriptor.symbol_names().map(String::from).collect();
                    status.watched = false;
                    status.failures += 1;
                }

                error!(module = %id, trigger = ?trigger, error = %err, "Module reload failed");
                let _ = self.events.send(ReloadEvent::failed(id, trigger, err.to_string()));
                Err(err)
            }
        }
    }
}

impl Drop for ReloadCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
