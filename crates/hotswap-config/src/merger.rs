//! Configuration file merging
//!
//! Supports loading and merging multiple manifests.
//! Later files override earlier files, allowing for layered configuration:
//! - modules.yaml (shared module table)
//! - local.yaml (developer overrides, extra modules)
//!
//! Manifests are merged as parsed documents before they are deserialized,
//! so a key an overlay leaves out keeps the value set by an earlier file
//! instead of falling back to its default.

use crate::types::Config;
use hotswap_core::{Error, Result};
use serde_json::Value;

/// Merge multiple parsed manifests into one configuration
///
/// Mappings merge key by key, with later documents winning. The top-level
/// `modules` list merges by `id`: an overlay entry replaces the earlier entry
/// with the same id, new entries keep their declaration order after the
/// existing ones.
pub fn merge_documents(documents: Vec<Value>) -> Result<Config> {
    let mut documents = documents.into_iter();

    let Some(mut merged) = documents.next() else {
        return Err(Error::Config("No configurations to merge".to_string()));
    };

    for overlay in documents {
        merge_document(&mut merged, overlay);
    }

    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))
}

/// Merge a whole manifest into `base`
fn merge_document(base: &mut Value, mut overlay: Value) {
    let modules = overlay
        .as_object_mut()
        .and_then(|overlay| overlay.remove("modules"));

    merge_values(base, overlay);

    if let Some(modules) = modules {
        match base.as_object_mut() {
            Some(base) => match base.get_mut("modules") {
                Some(existing) => merge_modules(existing, modules),
                None => {
                    base.insert("modules".to_string(), modules);
                }
            },
            None => *base = Value::Object([("modules".to_string(), modules)].into_iter().collect()),
        }
    }
}

/// Recursive key-by-key merge; an explicit null leaves the base untouched
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merge module lists by id
fn merge_modules(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Array(base), Value::Array(overlay)) => {
            for module in overlay {
                let id = module.get("id").cloned();
                let existing = id
                    .as_ref()
                    .and_then(|id| base.iter_mut().find(|m| m.get("id") == Some(id)));

                match existing {
                    Some(existing) => *existing = module,
                    None => base.push(module),
                }
            }
        }
        (base, overlay) => merge_values(base, overlay),
    }
}
