//! Testing utilities
//!
//! [`FakeBackend`] stands in for the OS loader. Its "libraries" export real
//! `extern "C"` functions compiled into the test binary, so resolved symbols
//! can be called like native ones.

use crate::backend::{LibraryBackend, LoadFailure, LoadedLibrary, SymbolPtr};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Adds two integers
pub extern "C" fn fake_add(a: i32, b: i32) -> i32 {
    a + b
}

/// Multiplies two integers
pub extern "C" fn fake_multiply(a: i32, b: i32) -> i32 {
    a * b
}

/// Returns a constant
pub extern "C" fn fake_test_function() -> i32 {
    42
}

/// Callback run with a staged library path
pub type LibraryHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// In-process loader double
#[derive(Default)]
pub struct FakeBackend {
    exports: Mutex<HashMap<String, SymbolPtr>>,
    opened: Mutex<Vec<PathBuf>>,
    fail_code: Mutex<Option<i32>>,
    counters: Arc<Counters>,
    open_hook: Mutex<Option<LibraryHook>>,
    close_hook: Mutex<Option<LibraryHook>>,
}

impl fmt::Debug for FakeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeBackend")
            .field("exports", &self.exports.lock().keys().collect::<Vec<_>>())
            .field("opened", &self.open_count())
            .field("live", &self.live_count())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeBackend {
    /// Backend exporting nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend exporting `add`, `multiply` and `test_function`
    pub fn math() -> Self {
        let backend = Self::new();
        backend.export("add", fake_add as *const ());
        backend.export("multiply", fake_multiply as *const ());
        backend.export("test_function", fake_test_function as *const ());
        backend
    }

    /// Export `name` from libraries opened after this call
    pub fn export(&self, name: &str, address: *const ()) {
        if let Some(ptr) = SymbolPtr::new(address as *mut c_void) {
            self.exports.lock().insert(name.to_string(), ptr);
        }
    }

    /// Stop exporting `name` from libraries opened after this call
    pub fn remove_export(&self, name: &str) {
        self.exports.lock().remove(name);
    }

    /// Make every open fail with `code` until called with `None`
    pub fn fail_opens(&self, code: Option<i32>) {
        *self.fail_code.lock() = code;
    }

    /// Run `hook` inside every later open, before the library is returned
    pub fn on_open(&self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        *self.open_hook.lock() = Some(Arc::new(hook));
    }

    /// Run `hook` whenever a library opened after this call is closed
    pub fn on_close(&self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        *self.close_hook.lock() = Some(Arc::new(hook));
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Paths opened, in order
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }

    /// Libraries currently open
    pub fn live_count(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Libraries closed so far
    pub fn close_count(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

impl LibraryBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn LoadedLibrary>, LoadFailure> {
        if let Some(code) = *self.fail_code.lock() {
            return Err(LoadFailure {
                code: Some(code),
                message: format!("refusing to load {}", path.display()),
            });
        }

        if let Some(hook) = self.open_hook.lock().clone() {
            hook(path);
        }

        self.opened.lock().push(path.to_path_buf());
        self.counters.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeLibrary {
            path: path.to_path_buf(),
            exports: self.exports.lock().clone(),
            counters: Arc::clone(&self.counters),
            close_hook: self.close_hook.lock().clone(),
        }))
    }
}

struct FakeLibrary {
    path: PathBuf,
    exports: HashMap<String, SymbolPtr>,
    counters: Arc<Counters>,
    close_hook: Option<LibraryHook>,
}

impl LoadedLibrary for FakeLibrary {
    fn symbol(&self, name: &str) -> Option<SymbolPtr> {
        self.exports.get(name).copied()
    }

    fn close(self: Box<Self>) -> Result<(), LoadFailure> {
        if let Some(hook) = &self.close_hook {
            hook(&self.path);
        }
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
