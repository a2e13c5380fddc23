//! RunLights: drives networked RGB lighting controllers from the set of
//! running applications and from triggers sent by external launchers.

pub mod compiler;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod gateway;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod paths;
pub mod process_monitor;
pub mod resolver;
pub mod status;
