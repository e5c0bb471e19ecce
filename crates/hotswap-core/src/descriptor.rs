//! Module and symbol declarations
//!
//! Descriptors are plain data supplied by the discovery side: which native
//! modules exist, where their source library lives, and which exported
//! functions the host expects to call.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Call signature of an exported function
///
/// An opaque tag such as `fn(i32, i32) -> i32`. The runtime stores and reports
/// it but never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Create a signature tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The raw tag
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag with all whitespace removed, for comparisons that ignore formatting
    pub fn normalized(&self) -> String {
        self.0.chars().filter(|c| !c.is_whitespace()).collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Signature {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Signature {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// One exported function a module is expected to provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    /// Exported symbol name
    pub name: String,

    /// Call signature tag
    #[serde(default)]
    pub signature: Signature,
}

impl SymbolDescriptor {
    /// Create a symbol descriptor
    pub fn new(name: impl Into<String>, signature: impl Into<Signature>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
        }
    }
}

/// Declaration of a native module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Stable identity of the module
    pub id: String,

    /// Library file that gets rebuilt; never mapped directly
    pub source_path: PathBuf,

    /// Declared exports, in declaration order
    #[serde(default)]
    pub symbols: Vec<SymbolDescriptor>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no symbols
    pub fn new(id: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            symbols: Vec::new(),
        }
    }

    /// Declare an exported function
    pub fn with_symbol(mut self, name: impl Into<String>, signature: impl Into<Signature>) -> Self {
        self.symbols.push(SymbolDescriptor::new(name, signature));
        self
    }

    /// Source library path
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Look up a declared symbol
    pub fn symbol(&self, name: &str) -> Option<&SymbolDescriptor> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Whether a symbol is declared
    pub fn declares(&self, name: &str) -> bool {
        self.symbol(name).is_some()
    }

    /// Declared symbol names, in order
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|s| s.name.as_str())
    }
}

/// Supplier of module declarations
///
/// Implemented by whatever declares the modules a host wants loaded, such as a
/// manifest file or a table compiled into the host.
pub trait ModuleSource {
    /// Current set of module declarations
    fn modules(&self) -> Result<Vec<ModuleDescriptor>>;
}

impl ModuleSource for Vec<ModuleDescriptor> {
    fn modules(&self) -> Result<Vec<ModuleDescriptor>> {
        Ok(self.clone())
    }
}

impl ModuleSource for [ModuleDescriptor] {
    fn modules(&self) -> Result<Vec<ModuleDescriptor>> {
        Ok(self.to_vec())
    }
}

/// Platform file name for a native library, e.g. `libmath.so` or `math.dll`
pub fn library_file_name(name: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        name,
        std::env::consts::DLL_SUFFIX
    )
}
