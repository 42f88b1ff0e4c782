use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tm_core::error::{Result, TmError};
use tm_core::paths;

/// Poll interval while waiting for the advisory lock.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cross-process advisory lock on the state directory's `.lock` sentinel.
///
/// Serializes compound operations (complete-with-cascade, add-with-cycle-
/// check, migrations, config writes) across CLI processes. The holder's
/// PID is written into the sentinel so a timed-out waiter can report who
/// holds it. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
}

impl StateLock {
    /// Acquire the lock, waiting up to `timeout`. On expiry returns
    /// `LockTimeout` carrying the holder PID when the sentinel names one.
    pub fn acquire(state_dir: &Path, timeout: Duration) -> Result<Self> {
        let path = paths::lock_path(state_dir);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    TmError::PermissionDenied(path.display().to_string())
                }
                _ => TmError::StorageUnavailable(format!("opening {}: {e}", path.display())),
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let pid = std::process::id();
                    // Best effort; the lock works even if the PID note fails
                    let _ = file.set_len(0);
                    let _ = file.seek(SeekFrom::Start(0));
                    let _ = write!(file, "{pid}");
                    let _ = file.flush();
                    tracing::debug!(pid, path = %path.display(), "state lock acquired");
                    return Ok(Self { file });
                }
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(_) => {
                    return Err(TmError::LockTimeout {
                        held_by: read_holder_pid(&mut file),
                    });
                }
            }
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

fn read_holder_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}
