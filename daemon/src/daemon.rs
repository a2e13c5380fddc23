use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::dispatch::LightTransport;
use crate::engine::Engine;
use crate::gateway;
use crate::ipc::{self, IpcEndpoint, IpcError};
use crate::model::Config;
use crate::process_monitor::{ProcessLister, ProcessWatcher};

const EVENT_QUEUE_DEPTH: usize = 32;

/// How a daemon run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Shutdown was requested and every task has exited.
    Stopped,
    /// Another instance owns the IPC channel; nothing was touched.
    AlreadyRunning,
}

/// Owns the capabilities chosen at startup and wires the tasks together.
pub struct Daemon<T, L> {
    config: Arc<Config>,
    transport: T,
    lister: L,
    endpoint: IpcEndpoint,
    status_path: Option<PathBuf>,
}

impl<T, L> Daemon<T, L>
where
    T: LightTransport + 'static,
    L: ProcessLister + 'static,
{
    pub fn new(config: Arc<Config>, transport: T, lister: L) -> Self {
        Self { config, transport, lister, endpoint: IpcEndpoint::default(), status_path: None }
    }

    pub fn with_endpoint(mut self, endpoint: IpcEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_status_file(mut self, path: PathBuf) -> Self {
        self.status_path = Some(path);
        self
    }

    /// Runs until `shutdown` flips to `true`.
    ///
    /// The IPC channel is claimed before anything else. If another instance
    /// holds it, this returns [`Outcome::AlreadyRunning`] without applying any
    /// lighting or polling any process.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<Outcome> {
        let listener = match ipc::bind(&self.endpoint).await {
            Ok(listener) => listener,
            Err(IpcError::AlreadyRunning) => {
                warn!("RunLights is already running; exiting");
                return Ok(Outcome::AlreadyRunning);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to open IPC channel {}", self.endpoint.address())
                })
            }
        };

        let mut engine = Engine::new(Arc::clone(&self.config), self.transport);
        if let Some(path) = self.status_path {
            engine = engine.with_status_file(path);
        }
        engine.apply_idle().await;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let watcher = ProcessWatcher::new(self.lister, self.config.watch_set());
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let watcher_task = tokio::spawn(watcher.run(poll_interval, tx.clone(), shutdown.clone()));
        let gateway_task = tokio::spawn(gateway::run(listener, tx, shutdown.clone()));

        info!(
            controllers = self.config.controllers.len(),
            applications = self.config.applications.len(),
            "Engine running"
        );
        engine.run(rx, shutdown).await;

        for (name, task) in [("watcher", watcher_task), ("gateway", gateway_task)] {
            if let Err(e) = task.await {
                error!("{name} task failed: {e}");
            }
        }
        info!("Engine stopped");
        Ok(Outcome::Stopped)
    }
}
