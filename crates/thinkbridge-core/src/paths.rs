//! Filesystem locations

use std::path::PathBuf;

use crate::constants::debug::{CONFIG_DIR_NAME, LOGS_DIR_NAME};

/// Base directory for thinkbridge state (`~/.thinkbridge`)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default directory for diagnostic request captures
pub fn logs_dir() -> PathBuf {
    config_dir().join(LOGS_DIR_NAME)
}
