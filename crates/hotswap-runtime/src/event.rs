//! Reload events and poll reports

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// What started a reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadTrigger {
    /// First registration or re-declaration of the module
    Registration,

    /// The source library changed on disk
    FileChanged,

    /// Explicit reload request
    Manual,
}

/// Module reload event
#[derive(Debug, Clone, Serialize)]
pub struct ReloadEvent {
    /// Module id
    pub module_id: String,

    /// Timestamp of the reload
    pub timestamp: DateTime<Utc>,

    /// What started the reload
    pub trigger: ReloadTrigger,

    /// Whether the reload was successful
    pub success: bool,

    /// Staged copy now mapped, on success
    pub staging_path: Option<PathBuf>,

    /// Error message if reload failed
    pub error: Option<String>,
}

impl ReloadEvent {
    pub(crate) fn loaded(module_id: &str, trigger: ReloadTrigger, staging_path: PathBuf) -> Self {
        Self {
            module_id: module_id.to_string(),
            timestamp: Utc::now(),
            trigger,
            success: true,
            staging_path: Some(staging_path),
            error: None,
        }
    }

    pub(crate) fn failed(module_id: &str, trigger: ReloadTrigger, error: String) -> Self {
        Self {
            module_id: module_id.to_string(),
            timestamp: Utc::now(),
            trigger,
            success: false,
            staging_path: None,
            error: Some(error),
        }
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Modules reloaded successfully
    pub reloaded: Vec<String>,

    /// Modules whose reload failed, with the error message
    pub failed: Vec<(String, String)>,

    /// Modules whose reload was postponed because their bindings were in use
    pub deferred: Vec<String>,
}

impl PollReport {
    /// Whether the poll did nothing
    pub fn is_empty(&self) -> bool {
        self.reloaded.is_empty() && self.failed.is_empty() && self.deferred.is_empty()
    }
}
