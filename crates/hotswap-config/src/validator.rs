//! Configuration validation

use crate::Config;
use hotswap_core::{Error, Result};
use std::collections::HashSet;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_runtime(config)?;
    validate_modules(config)?;
    validate_observability(config)?;

    Ok(())
}

fn validate_runtime(config: &Config) -> Result<()> {
    let runtime = &config.runtime;

    if runtime.poll_interval.is_zero() {
        return Err(Error::Config("poll_interval must be > 0".to_string()));
    }

    if runtime.poll_interval.as_secs() > 60 {
        tracing::warn!("poll_interval is very high (>1 minute)");
    }

    if runtime.reload_lock_timeout.is_zero() {
        return Err(Error::Config("reload_lock_timeout must be > 0".to_string()));
    }

    if runtime.watch.poll_interval.is_zero() {
        return Err(Error::Config("watch poll_interval must be > 0".to_string()));
    }

    Ok(())
}

fn validate_modules(config: &Config) -> Result<()> {
    let mut ids = HashSet::new();
    let staging_dir = config.runtime.staging_dir();

    for module in &config.modules {
        if module.id.is_empty() {
            return Err(Error::Config("module id cannot be empty".to_string()));
        }

        if !ids.insert(module.id.as_str()) {
            return Err(Error::Config(format!("Duplicate module id: {}", module.id)));
        }

        if module.path.as_os_str().is_empty() {
            return Err(Error::Config(format!(
                "module '{}' path cannot be empty",
                module.id
            )));
        }

        if module.path.parent() == Some(staging_dir.as_path()) {
            return Err(Error::Config(format!(
                "module '{}' source lives in the staging directory {}",
                module.id,
                staging_dir.display()
            )));
        }

        if module.symbols.is_empty() {
            tracing::warn!(module = %module.id, "Module declares no symbols");
        }

        let mut names = HashSet::new();
        for symbol in &module.symbols {
            if symbol.name.is_empty() {
                return Err(Error::Config(format!(
                    "module '{}' has a symbol with an empty name",
                    module.id
                )));
            }

            if !names.insert(symbol.name.as_str()) {
                return Err(Error::Config(format!(
                    "module '{}' declares symbol '{}' twice",
                    module.id, symbol.name
                )));
            }
        }
    }

    Ok(())
}

fn validate_observability(config: &Config) -> Result<()> {
    match config.observability.logging.format.as_str() {
        "text" | "json" => Ok(()),
        other => Err(Error::Config(format!(
            "Invalid log format: {other} (must be text or json)"
        ))),
    }
}
