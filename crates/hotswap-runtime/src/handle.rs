//! Loaded module handles
//!
//! A [`ModuleHandle`] owns one mapping of a staged library plus the symbol
//! bindings resolved from it. Unloading clears every binding before the
//! library is released.

use crate::backend::{LibraryBackend, LoadedLibrary, SymbolPtr};
use crate::staging::StagingArea;
use crate::watch::FileWatch;
use chrono::{DateTime, Utc};
use hotswap_core::{Error, ModuleDescriptor, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum ModuleState {
    /// Library mapped, bindings valid
    Loaded,

    /// Library mapped, source changed since load; reloads on next poll
    Dirty,

    /// No library mapped
    Unloaded,

    /// Last load attempt failed
    Failed(String),
}

impl ModuleState {
    /// Whether bindings may be called
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Dirty)
    }

    /// Whether the last load attempt failed
    pub fn is_failed(&self) -> bool {
        matches!(self, ModuleState::Failed(_))
    }
}

/// One loaded instance of a module
pub struct ModuleHandle {
    descriptor: Arc<ModuleDescriptor>,
    library: Option<Box<dyn LoadedLibrary>>,
    staging_path: PathBuf,
    bindings: HashMap<String, Option<SymbolPtr>>,
    watch: Option<FileWatch>,
    loaded_at: DateTime<Utc>,
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module", &self.descriptor.id)
            .field("staging_path", &self.staging_path)
            .field("loaded", &self.is_loaded())
            .field("bindings", &self.bindings)
            .field("watch", &self.watch)
            .finish()
    }
}

impl ModuleHandle {
    /// Stage, map and bind a module
    ///
    /// Missing symbols are logged and left unbound; they never fail the load.
    pub fn load(
        descriptor: Arc<ModuleDescriptor>,
        backend: &dyn LibraryBackend,
        staging: &StagingArea,
    ) -> Result<Self> {
        let source = descriptor.source_path();

        if !source.is_file() {
            return Err(Error::SourceNotFound {
                module: descriptor.id.clone(),
                path: source.to_path_buf(),
            });
        }

        let staging_path = staging.stage(&descriptor.id, source)?;

        let library = backend
            .open(&staging_path)
            .map_err(|failure| Error::LoadFailed {
                module: descriptor.id.clone(),
                path: staging_path.clone(),
                code: failure.code,
                message: failure.message,
            })?;

        let mut bindings = HashMap::with_capacity(descriptor.symbols.len());
        for symbol in &descriptor.symbols {
            let ptr = library.symbol(&symbol.name);
            if ptr.is_none() {
                let err = Error::SymbolNotFound {
                    module: descriptor.id.clone(),
                    symbol: symbol.name.clone(),
                };
                warn!(
                    module = %descriptor.id,
                    path = %source.display(),
                    error = %err,
                    "Symbol left unbound"
                );
            }
            bindings.insert(symbol.name.clone(), ptr);
        }

        let handle = Self {
            descriptor,
            library: Some(library),
            staging_path,
            bindings,
            watch: None,
            loaded_at: Utc::now(),
        };

        info!(
            module = %handle.descriptor.id,
            staged = %handle.staging_path.display(),
            bound = handle.bound_symbols().len(),
            missing = handle.missing_symbols().len(),
            "Module loaded"
        );

        Ok(handle)
    }

    /// Tear down the watch, clear bindings, then release the library
    ///
    /// Idempotent. The staged file is left on disk.
    pub fn unload(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.teardown();
        }

        for binding in self.bindings.values_mut() {
            *binding = None;
        }

        if let Some(library) = self.library.take() {
            if let Err(failure) = library.close() {
                warn!(
                    module = %self.descriptor.id,
                    staged = %self.staging_path.display(),
                    error = %failure,
                    "Library close reported an error"
                );
            }
            debug!(module = %self.descriptor.id, "Module unloaded");
        }
    }

    /// Attach the file change watch for this module's source
    pub fn attach_watch(&mut self, watch: FileWatch) {
        if let Some(previous) = self.watch.replace(watch) {
            previous.teardown();
        }
    }

    /// Resolved address of a declared symbol
    pub fn binding(&self, name: &str) -> Result<SymbolPtr> {
        if !self.is_loaded() {
            return Err(Error::not_bound(&self.descriptor.id, name));
        }

        self.bindings
            .get(name)
            .copied()
            .flatten()
            .ok_or_else(|| Error::not_bound(&self.descriptor.id, name))
    }

    /// Whether the library is mapped
    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }

    /// Whether a file change watch is active
    pub fn is_watched(&self) -> bool {
        self.watch.is_some()
    }

    /// Declaration this handle was loaded from
    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    /// Path of the mapped copy
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// When the library was mapped
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Declared symbols with a live binding, in declaration order
    pub fn bound_symbols(&self) -> Vec<String> {
        self.descriptor
            .symbol_names()
            .filter(|name| matches!(self.bindings.get(*name), Some(Some(_))))
            .map(String::from)
            .collect()
    }

    /// Declared symbols without a binding, in declaration order
    pub fn missing_symbols(&self) -> Vec<String> {
        self.descriptor
            .symbol_names()
            .filter(|name| !matches!(self.bindings.get(*name), Some(Some(_))))
            .map(String::from)
            .collect()
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    fn setup() -> (tempfile::TempDir, Arc<ModuleDescriptor>, StagingArea) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("libmath.so");
        std::fs::write(&source, b"fake library").unwrap();

        let descriptor = Arc::new(
            ModuleDescriptor::new("math", &source)
                .with_symbol("add", "fn(i32, i32) -> i32")
                .with_symbol("missing_fn", "fn()"),
        );
        let staging = StagingArea::new(dir.path().join("staging"));

        (dir, descriptor, staging)
    }

    #[test]
    fn test_load_binds_present_symbols_only() {
        let (_dir, descriptor, staging) = setup();
        let backend = FakeBackend::math();

        let handle =
            ModuleHandle::load(descriptor, &backend, &staging).unwrap();

        assert!(handle.is_loaded());
        assert!(!handle.is_watched());
        assert!(handle.binding("add").is_ok());
        assert!(matches!(
            handle.binding("missing_fn"),
            Err(Error::NotBound { .. })
        ));
        assert!(matches!(
            handle.binding("undeclared"),
            Err(Error::NotBound { .. })
        ));
        assert_eq!(handle.bound_symbols(), vec!["add"]);
        assert_eq!(handle.missing_symbols(), vec!["missing_fn"]);
        assert_ne!(handle.staging_path(), handle.descriptor().source_path());
    }

    #[test]
    fn test_load_missing_source() {
        let (dir, _, staging) = setup();
        let descriptor = Arc::new(ModuleDescriptor::new("gone", dir.path().join("libgone.so")));

        let err = ModuleHandle::load(descriptor, &FakeBackend::math(), &staging)
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound { .. }));
        assert!(staging.staged_files().unwrap().is_empty());
    }

    #[test]
    fn test_load_failure_carries_os_code() {
        let (_dir, descriptor, staging) = setup();
        let backend = FakeBackend::math();
        backend.fail_opens(Some(193));

        let err = ModuleHandle::load(descriptor, &backend, &staging).unwrap_err();
        match err {
            Error::LoadFailed { module, code, .. } => {
                assert_eq!(module, "math");
                assert_eq!(code, Some(193));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unload_clears_bindings_and_is_idempotent() {
        let (_dir, descriptor, staging) = setup();
        let backend = FakeBackend::math();

        let mut handle =
            ModuleHandle::load(descriptor, &backend, &staging).unwrap();
        let staged = handle.staging_path().to_path_buf();
        assert_eq!(backend.live_count(), 1);

        handle.unload();
        assert!(!handle.is_loaded());
        assert!(matches!(handle.binding("add"), Err(Error::NotBound { .. })));
        assert!(handle.bound_symbols().is_empty());
        assert_eq!(backend.live_count(), 0);
        assert!(staged.exists());

        handle.unload();
        assert_eq!(backend.close_count(), 1);

        drop(handle);
        assert_eq!(backend.close_count(), 1);
    }
}
