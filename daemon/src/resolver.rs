use std::collections::BTreeSet;

use crate::model::{Application, Config, Mode, ModeRole};

/// Which configuration is currently driving the lights.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EngineState {
    /// No watched process is running.
    #[default]
    Idle,
    Active { app: String, mode: String },
}

impl EngineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, EngineState::Idle)
    }

    pub fn active_app(&self) -> Option<&str> {
        match self {
            EngineState::Active { app, .. } => Some(app),
            EngineState::Idle => None,
        }
    }
}

/// Resolves the state for the currently running watched processes.
///
/// Applications are checked in config order and the first one with a running
/// process wins. If that is the application already active, `current` is
/// returned unchanged. Otherwise the app's startup mode is chosen when leaving
/// idle and its steady mode when taking over from another application.
pub fn resolve(config: &Config, current: &EngineState, running: &BTreeSet<String>) -> EngineState {
    let Some(app) = config
        .applications
        .iter()
        .filter(|app| !app.modes.is_empty())
        .find(|app| running.iter().any(|p| app.watches(p)))
    else {
        return EngineState::Idle;
    };

    if current.active_app() == Some(app.id.as_str()) {
        return current.clone();
    }

    let mode = if current.is_idle() { startup_mode(app) } else { steady_mode(app) };
    match mode {
        Some(mode) => EngineState::Active { app: app.id.clone(), mode: mode.id.clone() },
        None => EngineState::Idle,
    }
}

/// The mode flagged `startup`, falling back to the first mode.
pub fn startup_mode(app: &Application) -> Option<&Mode> {
    app.modes
        .iter()
        .find(|m| m.role == Some(ModeRole::Startup))
        .or_else(|| app.modes.first())
}

/// The mode flagged `steady`, falling back to the first non-startup mode, then the first mode.
pub fn steady_mode(app: &Application) -> Option<&Mode> {
    app.modes
        .iter()
        .find(|m| m.role == Some(ModeRole::Steady))
        .or_else(|| app.modes.iter().find(|m| m.role != Some(ModeRole::Startup)))
        .or_else(|| app.modes.first())
}
