use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::resolver::EngineState;

/// Coarse engine state exposed to the tray / debug viewer.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    /// No watched process is running; idle lighting is applied.
    Idle,
    /// A watched application is driving the lights.
    Active,
}

/// Runtime status written by the engine to `status.toml` next to the config.
/// External viewers read this file; the engine never reads it back.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineStatus {
    /// Engine binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: StatusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_mode: Option<String>,
    /// Most recent console name received over IPC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_console: Option<String>,
    /// RFC 3339 timestamp of the most recent applied trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<String>,
    /// Human-readable message for the last non-fatal error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineStatus {
    /// Constructs the initial idle status on startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: StatusState::Idle,
            active_application: None,
            active_mode: None,
            last_console: None,
            last_trigger: None,
            error: None,
        }
    }

    /// Mirrors the resolver state into the status fields.
    pub fn set_engine_state(&mut self, state: &EngineState) {
        match state {
            EngineState::Idle => {
                self.state = StatusState::Idle;
                self.active_application = None;
                self.active_mode = None;
            }
            EngineState::Active { app, mode } => {
                self.state = StatusState::Active;
                self.active_application = Some(app.clone());
                self.active_mode = Some(mode.clone());
            }
        }
    }

    pub fn touch(&mut self) {
        self.last_trigger = Some(chrono::Local::now().to_rfc3339());
    }
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged; a status write must never take the engine down.
pub fn write_status(path: &Path, status: &EngineStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("[status] Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("[status] Failed to write status file: {e}");
            }
        }
        Err(e) => warn!("[status] Failed to serialize status: {e}"),
    }
}
