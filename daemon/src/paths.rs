/// Canonical file locations for RunLights.
///
///   - `<config dir>/RunLights/config.toml`   read by the engine
///   - `<config dir>/RunLights/status.toml`   written by the engine
///   - `<data-local dir>/RunLights/logs/`     log output
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "RunLights";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
const LOG_DIR_NAME: &str = "logs";

/// `<config dir>/RunLights`, e.g. `%APPDATA%\RunLights` or `~/.config/RunLights`.
pub fn app_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .context("No configuration directory is available on this platform")
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}

/// The status file sits next to whichever config file is in use.
pub fn status_file_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(STATUS_FILE_NAME)
}

pub fn log_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(LOG_DIR_NAME))
        .context("No local data directory is available on this platform")
}
