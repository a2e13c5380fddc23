use std::collections::BTreeSet;

/// Everything that can make the engine re-apply lighting.
///
/// Producers (process watcher, IPC gateway) only send these; the engine loop
/// is the single consumer and the only place that dispatches. Shutdown is
/// signalled separately through a `watch` channel.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Watched processes appeared and/or disappeared since the previous poll.
    ProcessesChanged {
        started: BTreeSet<String>,
        stopped: BTreeSet<String>,
    },
    /// An external launcher selected a console by name.
    Console(String),
    /// An external source reported a new numeric level for the active fullfade mode.
    Level(f64),
}
