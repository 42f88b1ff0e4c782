use std::path::Path;
use std::time::Duration;
use tm_core::error::{Result, TmError};
use tm_core::paths;
use tm_core::settings::Settings;
use tm_database::{MigrationManager, StateLock, Store};

/// `tm init`: create the state directory, open the store, bring the schema
/// up to date, and write a default config if none exists. Safe to rerun.
pub async fn init(state_dir: &Path, lock_timeout: Duration) -> Result<()> {
    std::fs::create_dir_all(state_dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            TmError::PermissionDenied(state_dir.display().to_string())
        }
        _ => TmError::StorageUnavailable(format!("creating {}: {e}", state_dir.display())),
    })?;

    let _lock = StateLock::acquire(state_dir, lock_timeout)?;
    let store = Store::open(state_dir).await?;
    let applied = MigrationManager::new(&store).apply().await?;

    if !state_dir.join(tm_core::settings::CONFIG_FILE).exists() {
        Settings::default().save(state_dir)?;
    }

    if applied.is_empty() {
        println!("store ready at {} (schema current)", state_dir.display());
    } else {
        println!(
            "store initialized at {} ({} migration(s) applied)",
            state_dir.display(),
            applied.len()
        );
    }
    Ok(())
}

/// Open the store for a regular command: the directory must be
/// initialized and the schema current.
pub async fn open_store(state_dir: &Path) -> Result<Store> {
    if !paths::initialized(state_dir) {
        return Err(TmError::StorageUnavailable(format!(
            "no task store at {} (run 'tm init')",
            state_dir.display()
        )));
    }
    let store = Store::open(state_dir).await?;
    let status = MigrationManager::new(&store).status().await?;
    if !status.pending.is_empty() {
        return Err(TmError::StorageUnavailable(format!(
            "schema is behind ({} pending migration(s)); run 'tm migrate --apply'",
            status.pending.len()
        )));
    }
    Ok(store)
}
