//! Local usage telemetry.
//!
//! When the `telemetry` feature is enabled, commands append one event to a
//! per-day JSON file under `<state>/telemetry/`. Strictly local: no network
//! I/O and no identifying data, only feature/action counters. Failures are
//! logged and never fail the originating command.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Files older than this are pruned on write.
pub const RETENTION_DAYS: i64 = 30;
/// A day file past this size stops accepting events.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// One usage event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub ts: DateTime<Utc>,
    /// Feature area, e.g. "tasks", "collab", "core_loop"
    pub feature: String,
    /// Operation name, e.g. "add", "complete", "watch"
    pub action: String,
    /// Active feature toggles at the time, for adoption tracking
    #[serde(default)]
    pub context_flags: Vec<String>,
}

/// Appends events to per-day JSON array files.
#[derive(Debug, Clone)]
pub struct TelemetryLog {
    dir: PathBuf,
}

impl TelemetryLog {
    pub fn new(telemetry_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: telemetry_dir.into(),
        }
    }

    fn day_file(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    /// Append one event to today's file. Creates the directory and file on
    /// first use, prunes expired files, and silently drops the event when
    /// today's file is over the size cap.
    pub fn record(&self, event: TelemetryEvent) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        self.prune(event.ts)?;

        let path = self.day_file(event.ts.date_naive());
        let mut events: Vec<TelemetryEvent> = match std::fs::read(&path) {
            Ok(raw) => {
                if raw.len() as u64 > MAX_FILE_BYTES {
                    return Ok(());
                }
                serde_json::from_slice(&raw).unwrap_or_default()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        events.push(event);
        let raw = serde_json::to_vec_pretty(&events)?;
        std::fs::write(&path, raw)
    }

    /// Best-effort variant used from command paths.
    pub fn record_best_effort(&self, feature: &str, action: &str, context_flags: Vec<String>) {
        let event = TelemetryEvent {
            ts: Utc::now(),
            feature: feature.to_string(),
            action: action.to_string(),
            context_flags,
        };
        if let Err(e) = self.record(event) {
            tracing::warn!(error = %e, "telemetry write failed");
        }
    }

    /// Remove day files older than the retention window.
    fn prune(&self, now: DateTime<Utc>) -> std::io::Result<()> {
        let cutoff = now.date_naive() - Duration::days(RETENTION_DAYS);
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
            else {
                continue;
            };
            if let Ok(day) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                if day < cutoff {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }
}
