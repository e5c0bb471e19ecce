//! Configuration loading

use crate::{Config, ConfigFormat};
use hotswap_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::Path;

/// Matches `${VAR}` or `${VAR:-default}`
static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("env var pattern is valid")
});

/// Load configuration from a file
///
/// Relative module paths are resolved against the directory containing the
/// file, so a manifest can sit next to the libraries it declares.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {e}", path.display())))?;

    let format = ConfigFormat::from_path(path)?;

    let mut config = load_from_str(&content, format)?;

    if let Some(base) = path.parent() {
        resolve_module_paths(&mut config, base);
    }

    Ok(config)
}

/// Make relative module paths absolute against `base`
pub fn resolve_module_paths(config: &mut Config, base: &Path) {
    for module in &mut config.modules {
        if module.path.is_relative() {
            module.path = base.join(&module.path);
        }
    }

    if let Some(staging) = config.runtime.staging_dir.as_mut() {
        if staging.is_relative() {
            *staging = base.join(&*staging);
        }
    }
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in ENV_VAR_RE.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match env::var(var_name) {
            Ok(val) => val,
            Err(_) => match default_value {
                Some(default) => default.to_string(),
                None => {
                    return Err(Error::Config(format!(
                        "Environment variable '{var_name}' not set and no default provided"
                    )));
                }
            },
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded_content = expand_env_vars(content)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load and validate a configuration file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = load_from_file(path)?;

    crate::validator::validate_config(&config)?;

    Ok(config)
}

/// Load and merge multiple configuration files
///
/// Files are merged in order, with later files overriding earlier ones:
/// - modules.yaml (shared module table)
/// - local.yaml (developer paths, extra modules)
///
/// Only the keys a later file actually sets take effect; relative paths are
/// resolved against the directory of the file that declares them.
pub fn load_and_merge<P: AsRef<Path>>(paths: Vec<P>) -> Result<Config> {
    if paths.is_empty() {
        return Err(Error::Config("No configuration files provided".to_string()));
    }

    let mut documents = Vec::with_capacity(paths.len());

    for path in paths {
        documents.push(load_document(path.as_ref())?);
    }

    let merged = crate::merger::merge_documents(documents)?;
    crate::validator::validate_config(&merged)?;

    Ok(merged)
}

/// Parse a manifest into an untyped document for layering
fn load_document(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {e}", path.display())))?;

    let format = ConfigFormat::from_path(path)?;
    let expanded_content = expand_env_vars(&content)?;

    let mut document: Value = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    if document.is_null() {
        document = Value::Object(Map::new());
    }

    if let Some(base) = path.parent() {
        resolve_document_paths(&mut document, base);
    }

    Ok(document)
}

/// Same as [`resolve_module_paths`], on a document that is not yet typed
fn resolve_document_paths(document: &mut Value, base: &Path) {
    let resolve = |value: &mut Value| {
        if let Some(path) = value.as_str() {
            if Path::new(path).is_relative() {
                *value = Value::String(base.join(path).to_string_lossy().into_owned());
            }
        }
    };

    if let Some(modules) = document.get_mut("modules").and_then(Value::as_array_mut) {
        for path in modules.iter_mut().filter_map(|m| m.get_mut("path")) {
            resolve(path);
        }
    }

    if let Some(staging) = document.pointer_mut("/runtime/staging_dir") {
        resolve(staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WatchBackend;
    use std::path::PathBuf;
    use std::time::Duration;

    const YAML_CONFIG: &str = r#"
runtime:
  staging_dir: "/tmp/hotswap-test"
  poll_interval: "100ms"
  watch:
    backend: poll
    poll_interval: "500ms"

modules:
  - id: "example::Math"
    path: "/opt/native/libexample_math.so"
    symbols:
      - name: add
        signature: "fn(i32, i32) -> i32"
      - name: test_function
        signature: "fn() -> i32"

observability:
  logging:
    level: "debug"
    format: "json"
"#;

    #[test]
    fn test_load_yaml() {
        let config = load_from_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.runtime.poll_interval, Duration::from_millis(100));
        assert_eq!(config.runtime.watch.backend, WatchBackend::Poll);
        assert_eq!(config.modules.len(), 1);
        assert_eq!(config.modules[0].symbols.len(), 2);
        assert!(config.modules[0].enabled);
        assert_eq!(config.observability.logging.format, "json");
    }

    #[test]
    fn test_load_toml() {
        let toml = r#"
[runtime]
poll_interval = "1s"

[[modules]]
id = "math"
path = "libmath.so"

[[modules.symbols]]
name = "add"
signature = "fn(i32, i32) -> i32"
"#;
        let config = load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.runtime.poll_interval, Duration::from_secs(1));
        assert_eq!(config.modules[0].symbols[0].name, "add");
    }

    #[test]
    fn test_invalid_yaml() {
        let invalid = "modules: [yaml";
        let result = load_from_str(invalid, ConfigFormat::Yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_relative_paths_resolved_against_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("hotswap.yaml");
        fs::write(
            &manifest,
            r#"
runtime:
  staging_dir: "staging"
modules:
  - id: "math"
    path: "lib/libmath.so"
  - id: "abs"
    path: "/abs/libabs.so"
"#,
        )
        .unwrap();

        let config = load_from_file(&manifest).unwrap();
        assert_eq!(config.modules[0].path, dir.path().join("lib/libmath.so"));
        assert_eq!(config.modules[1].path, PathBuf::from("/abs/libabs.so"));
        assert_eq!(config.runtime.staging_dir(), dir.path().join("staging"));
    }

    #[test]
    fn test_env_var_with_default() {
        env::remove_var("HOTSWAP_UNDEFINED_LIB_DIR");

        let content = r#"
modules:
  - id: "math"
    path: "${HOTSWAP_UNDEFINED_LIB_DIR:-/usr/local/lib}/libmath.so"
"#;

        let config = load_from_str(content, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.modules[0].path, PathBuf::from("/usr/local/lib/libmath.so"));
    }

    #[test]
    fn test_env_var_override_default() {
        env::set_var("HOTSWAP_TEST_LIB_DIR", "/srv/native");

        let content = r#"
modules:
  - id: "math"
    path: "${HOTSWAP_TEST_LIB_DIR:-/usr/local/lib}/libmath.so"
"#;

        let config = load_from_str(content, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.modules[0].path, PathBuf::from("/srv/native/libmath.so"));

        env::remove_var("HOTSWAP_TEST_LIB_DIR");
    }

    #[test]
    fn test_missing_env_var_no_default() {
        env::remove_var("HOTSWAP_MISSING_VAR");

        let content = r#"
modules:
  - id: "math"
    path: "${HOTSWAP_MISSING_VAR}"
"#;

        let result = load_from_str(content, ConfigFormat::Yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("HOTSWAP_MISSING_VAR"));
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("HOTSWAP_PROFILE", "debug");
        env::set_var("HOTSWAP_CRATE", "example_math");

        let expanded = expand_env_vars("target/${HOTSWAP_PROFILE}/lib${HOTSWAP_CRATE}.so").unwrap();
        assert_eq!(expanded, "target/debug/libexample_math.so");

        env::remove_var("HOTSWAP_PROFILE");
        env::remove_var("HOTSWAP_CRATE");
    }

    #[test]
    fn test_load_and_merge_keeps_base_settings() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("modules.yaml");
        let local = dir.path().join("local").join("local.yaml");
        fs::create_dir_all(local.parent().unwrap()).unwrap();

        fs::write(
            &base,
            r#"
runtime:
  staging_dir: "staging"
  poll_interval: "5s"
  watch:
    backend: poll
modules:
  - id: "math"
    path: "lib/libmath.so"
observability:
  logging:
    level: "debug"
    format: "json"
"#,
        )
        .unwrap();
        fs::write(
            &local,
            r#"
modules:
  - id: "extra"
    path: "libextra.so"
"#,
        )
        .unwrap();

        let config = load_and_merge(vec![&base, &local]).unwrap();

        assert_eq!(config.runtime.poll_interval, Duration::from_secs(5));
        assert_eq!(config.runtime.watch.backend, WatchBackend::Poll);
        assert_eq!(config.observability.logging.level, "debug");
        assert_eq!(config.observability.logging.format, "json");
        assert_eq!(config.runtime.staging_dir(), dir.path().join("staging"));
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.module("math").unwrap().path, dir.path().join("lib/libmath.so"));
        assert_eq!(
            config.module("extra").unwrap().path,
            dir.path().join("local").join("libextra.so")
        );
    }

    #[test]
    fn test_load_and_merge_requires_files() {
        let result = load_and_merge(Vec::<PathBuf>::new());
        assert!(result.is_err());
    }
}
