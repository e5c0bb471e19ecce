//! # hotswap Runtime
//!
//! Loading and hot reloading of native shared libraries.
//!
//! ## Features
//!
//! - **Staging**: libraries are mapped from private copies, never from the
//!   build output, so rebuilding a module while it is loaded is safe
//! - **File Watch**: source changes raise a per-module dirty flag
//! - **Reload Coordinator**: swaps modules atomically on the next poll
//! - **Scoped Lookup**: resolved symbols pin their library until dropped
//!
//! ## Example
//!
//! ```rust,no_run
//! use hotswap_runtime::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<()> {
//! let coordinator = Arc::new(ReloadCoordinator::new(RuntimeConfig::default()));
//!
//! coordinator.register_or_refresh(
//!     ModuleDescriptor::new("math", "target/debug/libhotswap_example_math.so")
//!         .with_symbol("add", "fn(i32, i32) -> i32"),
//! )?;
//!
//! let ticks = TickDriver::new(coordinator.clone(), Duration::from_millis(250)).spawn();
//!
//! let sum = unsafe {
//!     coordinator.with_symbol("math", "add", |add: extern "C" fn(i32, i32) -> i32| add(2, 3))?
//! };
//! assert_eq!(sum, 5);
//!
//! ticks.stop().await;
//! coordinator.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod backend;
pub mod coordinator;
pub mod event;
pub mod handle;
pub mod staging;
pub mod symbol;
pub mod tick;
pub mod watch;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{LibraryBackend, LoadFailure, LoadedLibrary, NativeBackend, SymbolPtr};
pub use coordinator::{ModuleInfo, ReloadCoordinator};
pub use event::{PollReport, ReloadEvent, ReloadTrigger};
pub use handle::{ModuleHandle, ModuleState};
pub use staging::StagingArea;
pub use symbol::{BoundSymbol, Symbol};
pub use tick::{PollTarget, TickDriver, TickHandle};
pub use watch::{FileWatch, WatchRegistry};

pub use hotswap_config::{RuntimeConfig, WatchBackend, WatchConfig};
pub use hotswap_core::{Error, ModuleDescriptor, ModuleSource, Result, Signature, SymbolDescriptor};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::coordinator::{ModuleInfo, ReloadCoordinator};
    pub use crate::event::{PollReport, ReloadEvent};
    pub use crate::handle::ModuleState;
    pub use crate::symbol::BoundSymbol;
    pub use crate::tick::{PollTarget, TickDriver};
    pub use hotswap_config::RuntimeConfig;
    pub use hotswap_core::prelude::*;
}
