//! Configuration types

use hotswap_core::{ModuleDescriptor, ModuleSource, SymbolDescriptor};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Declared native modules
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,

    /// Observability
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Find a module by id
    pub fn module(&self, id: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Descriptors for every enabled module
    pub fn module_descriptors(&self) -> Vec<ModuleDescriptor> {
        self.modules
            .iter()
            .filter(|m| m.enabled)
            .map(ModuleConfig::to_descriptor)
            .collect()
    }
}

impl ModuleSource for Config {
    fn modules(&self) -> hotswap_core::Result<Vec<ModuleDescriptor>> {
        Ok(self.module_descriptors())
    }
}

/// Reload runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Directory receiving staged library copies (default: `$TMPDIR/hotswap`)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// How often the tick driver polls for dirty modules
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long a reload waits for outstanding symbol lookups before deferring
    #[serde(default = "default_reload_lock_timeout", with = "humantime_serde")]
    pub reload_lock_timeout: Duration,

    /// File change watch settings
    #[serde(default)]
    pub watch: WatchConfig,
}

impl RuntimeConfig {
    /// Effective staging directory
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hotswap"))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            poll_interval: default_poll_interval(),
            reload_lock_timeout: default_reload_lock_timeout(),
            watch: WatchConfig::default(),
        }
    }
}

/// File change watch configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Notification backend
    #[serde(default)]
    pub backend: WatchBackend,

    /// Scan interval for the `poll` backend
    #[serde(default = "default_watch_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            backend: WatchBackend::default(),
            poll_interval: default_watch_poll_interval(),
        }
    }
}

/// File change notification backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// Platform notifier (inotify, FSEvents, ReadDirectoryChangesW)
    #[default]
    Native,

    /// Periodic metadata scan, for filesystems without change notification
    Poll,
}

/// Native module declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Stable module id
    pub id: String,

    /// Source library path
    pub path: PathBuf,

    /// Whether the module is loaded
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Exported functions
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
}

impl ModuleConfig {
    /// Convert into a runtime descriptor
    pub fn to_descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            id: self.id.clone(),
            source_path: self.path.clone(),
            symbols: self
                .symbols
                .iter()
                .map(|s| SymbolDescriptor::new(s.name.clone(), s.signature.clone()))
                .collect(),
        }
    }
}

/// Exported function declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolConfig {
    /// Exported symbol name
    pub name: String,

    /// Call signature tag, e.g. `fn(i32, i32) -> i32`
    #[serde(default)]
    pub signature: String,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// Default functions
fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_reload_lock_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_watch_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_enabled() -> bool {
    true
}
