/// Canonical file paths for tagclip data files.
///
/// Both files live under `<config dir>/tagclip/`:
///   - config.toml  Saved by "set as default", watched by the daemon.
///   - status.toml  Written by the daemon, read by any front end.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "tagclip";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the tagclip data directory, falling back to the working directory
/// when the platform has no config directory.
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}
