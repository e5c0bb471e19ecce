//! Scoped access to resolved symbols

use crate::backend::SymbolPtr;
use crate::handle::ModuleHandle;
use hotswap_core::{Error, Result, Signature};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::RawRwLock;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;

pub(crate) type HandleReadGuard = ArcRwLockReadGuard<RawRwLock, Option<ModuleHandle>>;

/// A live binding, pinned for as long as this value exists
///
/// While any `BoundSymbol` of a module is alive that module cannot be
/// reloaded or unloaded; reloads wait for it up to the configured lock
/// timeout and are deferred past that. Drop it as soon as the call returns.
pub struct BoundSymbol {
    guard: HandleReadGuard,
    name: String,
    ptr: SymbolPtr,
}

impl fmt::Debug for BoundSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSymbol")
            .field("module", &self.module_id())
            .field("name", &self.name)
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl BoundSymbol {
    pub(crate) fn new(guard: HandleReadGuard, name: &str, ptr: SymbolPtr) -> Self {
        Self {
            guard,
            name: name.to_string(),
            ptr,
        }
    }

    /// Exported symbol name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning module id
    pub fn module_id(&self) -> &str {
        (*self.guard)
            .as_ref()
            .map(|handle| handle.descriptor().id.as_str())
            .unwrap_or_default()
    }

    /// Declared signature tag
    pub fn signature(&self) -> Option<&Signature> {
        (*self.guard)
            .as_ref()?
            .descriptor()
            .symbol(&self.name)
            .map(|symbol| &symbol.signature)
    }

    /// Raw address
    pub fn address(&self) -> *const c_void {
        self.ptr.as_ptr()
    }

    /// View the symbol as a value of type `F`, usually an `extern "C" fn`
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the exported function's
    /// real signature and calling convention.
    pub unsafe fn get<F: Copy>(&self) -> Result<Symbol<'_, F>> {
        if mem::size_of::<F>() != mem::size_of::<*const c_void>() {
            return Err(Error::SignatureMismatch {
                symbol: self.name.clone(),
                requested: std::any::type_name::<F>(),
            });
        }

        let raw = self.ptr.as_ptr();
        // SAFETY: sizes match (checked above); the caller vouches for the type.
        let value = unsafe { mem::transmute_copy::<*const c_void, F>(&raw) };

        Ok(Symbol {
            value,
            _bound: PhantomData,
        })
    }
}

/// Typed view of a [`BoundSymbol`], borrowing it
pub struct Symbol<'a, F> {
    value: F,
    _bound: PhantomData<&'a BoundSymbol>,
}

impl<F> Deref for Symbol<'_, F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.value
    }
}

impl<F> fmt::Debug for Symbol<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("type", &std::any::type_name::<F>())
            .finish()
    }
}
