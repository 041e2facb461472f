//! Path layout for relay data

use std::path::PathBuf;

/// Relay data directory (~/.relay)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("failed to locate home directory")
        .join(".relay")
}

/// Config file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Default working directory for tasks
pub fn workspace_path() -> PathBuf {
    data_dir().join("workspace")
}

/// Checkpoint snapshot storage
pub fn checkpoints_dir() -> PathBuf {
    data_dir().join("checkpoints")
}
