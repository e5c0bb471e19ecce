//! Dynamic loading backends
//!
//! [`LibraryBackend`] is the seam between the reload machinery and the OS
//! loader. [`NativeBackend`] maps real shared libraries with `libloading`.

use std::ffi::c_void;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::trace;

/// Address of an exported symbol
///
/// Only meaningful while the library it came from is mapped.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolPtr(NonNull<c_void>);

// SAFETY: the pointer is an address inside a mapped image, not owned data.
// Whether it may be called is governed by the owning handle's lock.
unsafe impl Send for SymbolPtr {}
unsafe impl Sync for SymbolPtr {}

impl SymbolPtr {
    /// Wrap a raw address; `None` for null
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Raw address
    pub fn as_ptr(self) -> *const c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for SymbolPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolPtr({:p})", self.0)
    }
}

/// Why the loader rejected a library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// OS error code, when the platform reports one
    pub code: Option<i32>,
    /// Loader message
    pub message: String,
}

impl LoadFailure {
    /// Failure without an OS code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code:#010X})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<libloading::Error> for LoadFailure {
    fn from(err: libloading::Error) -> Self {
        let code = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<io::Error>())
            .and_then(io::Error::raw_os_error);

        Self {
            code,
            message: err.to_string(),
        }
    }
}

/// A library mapped into the process
pub trait LoadedLibrary: Send + Sync {
    /// Address of an exported symbol, if present
    fn symbol(&self, name: &str) -> Option<SymbolPtr>;

    /// Unmap the library
    fn close(self: Box<Self>) -> Result<(), LoadFailure>;
}

/// Opens libraries
pub trait LibraryBackend: Send + Sync + fmt::Debug {
    /// Map the library at `path`
    fn open(&self, path: &Path) -> Result<Box<dyn LoadedLibrary>, LoadFailure>;
}

/// OS dynamic loader (`dlopen` / `LoadLibraryExW`)
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    /// Create the native backend
    pub fn new() -> Self {
        Self
    }
}

impl LibraryBackend for NativeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn LoadedLibrary>, LoadFailure> {
        // SAFETY: loading runs the library's initialisers. Hosts only declare
        // libraries they trust; the path is a private staged copy.
        let library = unsafe { libloading::Library::new(path) }?;

        trace!(path = %path.display(), "Mapped library");

        Ok(Box::new(NativeLibrary {
            library,
            path: path.to_path_buf(),
        }))
    }
}

struct NativeLibrary {
    library: libloading::Library,
    path: PathBuf,
}

impl LoadedLibrary for NativeLibrary {
    fn symbol(&self, name: &str) -> Option<SymbolPtr> {
        // SAFETY: the symbol is read as an untyped address and never
        // dereferenced here; typing happens at the call site.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        SymbolPtr::new(*symbol)
    }

    fn close(self: Box<Self>) -> Result<(), LoadFailure> {
        let NativeLibrary { library, path } = *self;
        library.close()?;
        trace!(path = %path.display(), "Unmapped library");
        Ok(())
    }
}
