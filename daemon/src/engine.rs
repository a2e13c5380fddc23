//! Engine orchestrator.
//!
//! The engine is the only consumer of the event queue, so resolution,
//! compilation and dispatch for one event finish before the next event is
//! looked at. Watcher and gateway never touch controllers themselves.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::compiler::{self, CompileError, ControllerOutput, ModeInput};
use crate::dispatch::{Dispatcher, LightTransport};
use crate::event::EngineEvent;
use crate::model::{Application, Config, Mode, ModeOutput};
use crate::resolver::{self, EngineState};
use crate::status::{self, EngineStatus};

/// Why an external trigger produced no output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriggerError {
    #[error("no application is active and no console_application is configured")]
    NoTargetApplication,
    #[error("application '{0}' is not configured")]
    UnknownApplication(String),
    #[error("application '{0}' has no segmentsolid mode")]
    NoSegmentSolidMode(String),
    #[error("no fullfade mode is active")]
    NoFullFadeMode,
    #[error(transparent)]
    Compile(#[from] CompileError),
}

pub struct Engine<T> {
    config: Arc<Config>,
    dispatcher: Dispatcher<T>,
    state: EngineState,
    running: BTreeSet<String>,
    status: EngineStatus,
    status_path: Option<PathBuf>,
}

impl<T: LightTransport> Engine<T> {
    pub fn new(config: Arc<Config>, transport: T) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&config), transport);
        Self {
            config,
            dispatcher,
            state: EngineState::Idle,
            running: BTreeSet::new(),
            status: EngineStatus::new(),
            status_path: None,
        }
    }

    /// Mirrors engine state into `path` after every handled event.
    pub fn with_status_file(mut self, path: PathBuf) -> Self {
        self.status_path = Some(path);
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    /// Applies the idle lighting to every segment of every controller.
    pub async fn apply_idle(&mut self) {
        info!("Applying idle state");
        let outputs = compiler::compile_idle(&self.config);
        self.apply(&outputs).await;
        self.write_status();
    }

    /// Consumes events until `shutdown` flips to `true` or every producer is gone.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<EngineEvent>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                event = rx.recv() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(event) = event else { break };
            self.handle(event).await;
        }
        debug!("Engine loop stopped");
    }

    /// Handles one event to completion, including dispatch.
    pub async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ProcessesChanged { started, stopped } => {
                self.on_processes_changed(started, stopped).await
            }
            EngineEvent::Console(name) => self.on_console(&name).await,
            EngineEvent::Level(value) => self.on_level(value).await,
        }
        self.write_status();
    }

    async fn on_processes_changed(&mut self, started: BTreeSet<String>, stopped: BTreeSet<String>) {
        for name in &started {
            info!(process = %name, "Watched process started");
        }
        for name in &stopped {
            info!(process = %name, "Watched process stopped");
            self.running.remove(name);
        }
        self.running.extend(started);

        let next = resolver::resolve(&self.config, &self.state, &self.running);
        if next == self.state {
            debug!(state = ?self.state, "Resolved state unchanged");
            return;
        }
        self.state = next;
        self.status.set_engine_state(&self.state);

        match self.state.clone() {
            EngineState::Idle => {
                info!("No watched process running; returning to idle");
                let outputs = compiler::compile_idle(&self.config);
                self.apply(&outputs).await;
            }
            EngineState::Active { app, mode } => {
                info!(app = %app, mode = %mode, "Activating mode");
                let compiled = self
                    .active_mode()
                    .map(|m| compiler::compile(m, &ModeInput::Unset, &self.config));
                match compiled {
                    Some(Ok(outputs)) => self.apply(&outputs).await,
                    Some(Err(e)) => self.report(&TriggerError::from(e)),
                    None => warn!(app = %app, mode = %mode, "Active mode vanished from config"),
                }
            }
        }
    }

    async fn on_console(&mut self, name: &str) {
        self.status.last_console = Some(name.to_string());
        match self.console_outputs(name) {
            Ok(outputs) => self.apply(&outputs).await,
            Err(e) => self.report(&e),
        }
    }

    async fn on_level(&mut self, value: f64) {
        let compiled = match self.active_mode() {
            Some(mode) if matches!(mode.output, ModeOutput::FullFade(_)) => {
                compiler::compile(mode, &ModeInput::Level(value), &self.config).map_err(TriggerError::from)
            }
            _ => Err(TriggerError::NoFullFadeMode),
        };
        match compiled {
            Ok(outputs) => self.apply(&outputs).await,
            Err(e) => self.report(&e),
        }
    }

    /// Compiles a console trigger against the active application, or the
    /// configured console application when idle.
    pub fn console_outputs(&self, name: &str) -> Result<Vec<ControllerOutput>, TriggerError> {
        let app_id = self
            .state
            .active_app()
            .or(self.config.console_application.as_deref())
            .ok_or(TriggerError::NoTargetApplication)?;
        let app = self
            .config
            .application(app_id)
            .ok_or_else(|| TriggerError::UnknownApplication(app_id.to_string()))?;

        let mode = self
            .active_mode()
            .filter(|m| m.as_segment_solid().is_some())
            .or_else(|| console_mode(app, name))
            .ok_or_else(|| TriggerError::NoSegmentSolidMode(app.id.clone()))?;

        debug!(app = %app.id, mode = %mode.id, console = %name, "Resolved console trigger");
        Ok(compiler::compile(mode, &ModeInput::Binding(name.to_string()), &self.config)?)
    }

    fn active_mode(&self) -> Option<&Mode> {
        match &self.state {
            EngineState::Active { app, mode } => self.config.application(app)?.mode(mode),
            EngineState::Idle => None,
        }
    }

    async fn apply(&mut self, outputs: &[ControllerOutput]) {
        if self.config.controllers.is_empty() {
            warn!("No controllers configured; nothing to apply");
            return;
        }
        let reports = self.dispatcher.dispatch_batch(outputs).await;
        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| r.result.is_err())
            .map(|r| r.controller.as_str())
            .collect();
        self.status.error = (!failed.is_empty())
            .then(|| format!("Dispatch failed for: {}", failed.join(", ")));
        self.status.touch();
    }

    fn report(&mut self, error: &TriggerError) {
        warn!("Trigger ignored: {error}");
        self.status.error = Some(error.to_string());
    }

    fn write_status(&self) {
        if let Some(path) = &self.status_path {
            status::write_status(path, &self.status);
        }
    }
}

/// First segmentsolid mode that binds `name`, else the first segmentsolid mode.
fn console_mode<'a>(app: &'a Application, name: &str) -> Option<&'a Mode> {
    let mut solid = app.modes.iter().filter(|m| m.as_segment_solid().is_some());
    let first = solid.clone().next();
    solid
        .find(|m| m.as_segment_solid().is_some_and(|s| s.binding(name).is_some()))
        .or(first)
}
