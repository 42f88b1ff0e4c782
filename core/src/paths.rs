//! State-directory layout and resolution.

use std::env;
use std::path::{Path, PathBuf};

/// Hidden per-project state directory name.
pub const STATE_DIR_NAME: &str = ".tm";
/// Database file inside the state directory.
pub const DB_FILE: &str = "tasks.db";
/// Advisory lock sentinel.
pub const LOCK_FILE: &str = ".lock";
/// Backup directory for pre-migration copies.
pub const BACKUPS_DIR: &str = "backups";
/// Daily telemetry files.
pub const TELEMETRY_DIR: &str = "telemetry";

/// Environment variable overriding the state directory location.
pub const DB_PATH_VAR: &str = "TM_DB_PATH";
/// Environment variable overriding the lock wait, in seconds.
pub const LOCK_TIMEOUT_VAR: &str = "TM_LOCK_TIMEOUT";

/// Resolve the state directory: `TM_DB_PATH` override, else
/// `<cwd>/.tm`.
pub fn state_dir() -> PathBuf {
    if let Ok(path) = env::var(DB_PATH_VAR) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

pub fn db_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DB_FILE)
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}

pub fn backups_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(BACKUPS_DIR)
}

pub fn telemetry_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(TELEMETRY_DIR)
}

/// Whether a store has been initialized under this state directory.
pub fn initialized(state_dir: &Path) -> bool {
    db_path(state_dir).is_file()
}
