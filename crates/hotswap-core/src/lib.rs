//! # hotswap Core
//!
//! Core types and error handling shared by the hotswap crates:
//! - Module and symbol descriptors
//! - The [`ModuleSource`] discovery trait
//! - Error types

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod descriptor;
pub mod error;

pub use descriptor::{library_file_name, ModuleDescriptor, ModuleSource, Signature, SymbolDescriptor};
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::descriptor::{ModuleDescriptor, ModuleSource, Signature, SymbolDescriptor};
    pub use crate::error::{Error, Result};
}
