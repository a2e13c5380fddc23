use std::collections::{BTreeSet, HashSet};
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::event::EngineEvent;

#[derive(Debug, thiserror::Error)]
#[error("process enumeration failed: {0}")]
pub struct ProcessListError(pub String);

/// Source of the OS process list. Chosen once at startup.
pub trait ProcessLister: Send {
    /// Lowercase names of every running process.
    fn running_process_names(&mut self) -> Result<HashSet<String>, ProcessListError>;
}

/// [`ProcessLister`] backed by `sysinfo`.
pub struct SysinfoLister {
    sys: System,
}

impl SysinfoLister {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SysinfoLister {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLister for SysinfoLister {
    fn running_process_names(&mut self) -> Result<HashSet<String>, ProcessListError> {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        // A live system always has processes; an empty table means the refresh failed.
        if self.sys.processes().is_empty() {
            return Err(ProcessListError("OS returned an empty process table".into()));
        }
        Ok(self
            .sys
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().to_lowercase())
            .collect())
    }
}

/// Watched processes that appeared and disappeared between two polls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessDiff {
    pub started: BTreeSet<String>,
    pub stopped: BTreeSet<String>,
}

impl ProcessDiff {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// Diffs successive process snapshots, restricted to a watch-set.
pub struct ProcessWatcher<L> {
    lister: L,
    watch_set: HashSet<String>,
    previous: BTreeSet<String>,
}

impl<L: ProcessLister> ProcessWatcher<L> {
    /// `watch_set` entries are matched case-insensitively.
    pub fn new(lister: L, watch_set: HashSet<String>) -> Self {
        let watch_set = watch_set.into_iter().map(|p| p.to_lowercase()).collect();
        Self { lister, watch_set, previous: BTreeSet::new() }
    }

    /// Takes one snapshot and returns the diff against the previous one, or
    /// `None` when nothing changed. An enumeration failure keeps the previous
    /// snapshot so a transient OS error never looks like "everything stopped".
    pub fn poll(&mut self) -> Option<ProcessDiff> {
        let names = match self.lister.running_process_names() {
            Ok(names) => names,
            Err(e) => {
                warn!("[monitor] {e}; keeping previous snapshot");
                return None;
            }
        };
        let current: BTreeSet<String> =
            names.into_iter().filter(|n| self.watch_set.contains(n)).collect();

        let diff = ProcessDiff {
            started: current.difference(&self.previous).cloned().collect(),
            stopped: self.previous.difference(&current).cloned().collect(),
        };
        self.previous = current;
        (!diff.is_empty()).then_some(diff)
    }

    /// Polls every `poll_interval` and emits [`EngineEvent::ProcessesChanged`]
    /// until `shutdown` flips to `true` or the engine goes away.
    pub async fn run(
        mut self,
        poll_interval: Duration,
        tx: mpsc::Sender<EngineEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if self.watch_set.is_empty() {
            info!("[monitor] No processes to watch; polling disabled");
            return;
        }
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let Some(diff) = self.poll() else { continue };
            debug!(started = ?diff.started, stopped = ?diff.stopped, "[monitor] Process change");
            let event = EngineEvent::ProcessesChanged { started: diff.started, stopped: diff.stopped };
            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("[monitor] Stopped");
    }
}
