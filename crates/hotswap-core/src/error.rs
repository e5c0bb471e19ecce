//! Error types for hotswap

use std::path::PathBuf;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for hotswap
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The declared source library does not exist
    #[error("Source library for '{module}' not found: {}", .path.display())]
    SourceNotFound {
        /// Module id
        module: String,
        /// Declared source path
        path: PathBuf,
    },

    /// Copying the source library to its staging path failed
    #[error("Failed to stage '{module}' to {}: {source}", .path.display())]
    CopyFailed {
        /// Module id
        module: String,
        /// Staging path that could not be written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The dynamic loader rejected the staged library
    #[error("Failed to load library for '{module}' from {} (os error {}): {message}", .path.display(), display_code(.code))]
    LoadFailed {
        /// Module id
        module: String,
        /// Path handed to the loader
        path: PathBuf,
        /// OS error code, when the platform reports one
        code: Option<i32>,
        /// Loader message
        message: String,
    },

    /// A declared symbol is not exported by the loaded library
    #[error("Function '{symbol}' not found in module '{module}'")]
    SymbolNotFound {
        /// Module id
        module: String,
        /// Exported symbol name
        symbol: String,
    },

    /// The symbol has no live binding
    #[error("Symbol '{symbol}' of module '{module}' is not bound")]
    NotBound {
        /// Module id
        module: String,
        /// Exported symbol name
        symbol: String,
    },

    /// No module registered under this id
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// The module is pinned by an outstanding lookup; the reload will be retried
    #[error("Reload of '{0}' deferred: bindings are in use")]
    ReloadDeferred(String),

    /// Typed access with a type that cannot hold a function pointer
    #[error("Symbol '{symbol}' cannot be viewed as {requested}: expected a pointer-sized type")]
    SignatureMismatch {
        /// Exported symbol name
        symbol: String,
        /// Requested Rust type
        requested: &'static str,
    },

    /// File change watch could not be installed
    #[error("Failed to watch {}: {message}", .path.display())]
    Watch {
        /// Watched path
        path: PathBuf,
        /// Watcher message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("{code:#010X}"),
        None => "n/a".to_string(),
    }
}

impl Error {
    /// Create a not-bound error
    pub fn not_bound(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        Error::NotBound {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    /// Create a watch error
    pub fn watch(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Watch {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Module id the error refers to, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            Error::SourceNotFound { module, .. }
            | Error::CopyFailed { module, .. }
            | Error::LoadFailed { module, .. }
            | Error::SymbolNotFound { module, .. }
            | Error::NotBound { module, .. } => Some(module),
            Error::UnknownModule(module) | Error::ReloadDeferred(module) => Some(module),
            _ => None,
        }
    }

    /// Whether the error leaves the module without a loaded library
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Error::SourceNotFound { .. } | Error::CopyFailed { .. } | Error::LoadFailed { .. }
        )
    }
}
