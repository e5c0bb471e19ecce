//! Configuration builder

use crate::types::{Config, ModuleConfig, RuntimeConfig, SymbolConfig, WatchBackend};
use std::path::PathBuf;
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    runtime: RuntimeConfig,
    modules: Vec<ModuleConfig>,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the staging directory
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime.staging_dir = Some(dir.into());
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.runtime.poll_interval = interval;
        self
    }

    /// Set the reload lock timeout
    pub fn reload_lock_timeout(mut self, timeout: Duration) -> Self {
        self.runtime.reload_lock_timeout = timeout;
        self
    }

    /// Use the polling watch backend
    pub fn poll_watcher(mut self, interval: Duration) -> Self {
        self.runtime.watch.backend = WatchBackend::Poll;
        self.runtime.watch.poll_interval = interval;
        self
    }

    /// Declare a module; symbols are `(name, signature)` pairs
    pub fn module<'a>(
        mut self,
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        symbols: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        self.modules.push(ModuleConfig {
            id: id.into(),
            path: path.into(),
            enabled: true,
            symbols: symbols
                .into_iter()
                .map(|(name, signature)| SymbolConfig {
                    name: name.to_string(),
                    signature: signature.to_string(),
                })
                .collect(),
        });
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> hotswap_core::Result<Config> {
        let config = Config {
            runtime: self.runtime,
            modules: self.modules,
            ..Default::default()
        };

        crate::validator::validate_config(&config)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .staging_dir("/tmp/hotswap-builder")
            .poll_interval(Duration::from_millis(20))
            .module("math", "/opt/libmath.so", [("add", "fn(i32, i32) -> i32")])
            .build()
            .unwrap();

        assert_eq!(config.runtime.poll_interval, Duration::from_millis(20));
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].symbols[0].name, "add");
    }

    #[test]
    fn test_builder_rejects_duplicate_modules() {
        let result = ConfigBuilder::new()
            .module("math", "/opt/libmath.so", [])
            .module("math", "/opt/libmath2.so", [])
            .build();
        assert!(result.is_err());
    }
}
