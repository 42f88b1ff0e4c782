//! Feature toggles and enforcement configuration.
//!
//! Persisted as YAML in the project's hidden state directory
//! (`config.yaml`). Loaded lazily at process start; writes go through
//! [`Settings::save`] and the caller holds the state lock around them.

use crate::error::{Result, TmError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name inside the state directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Individually toggleable features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    SuccessCriteria,
    Feedback,
    Telemetry,
    CompletionSummaries,
    TimeTracking,
    Deadlines,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::SuccessCriteria => "success_criteria",
            Feature::Feedback => "feedback",
            Feature::Telemetry => "telemetry",
            Feature::CompletionSummaries => "completion_summaries",
            Feature::TimeTracking => "time_tracking",
            Feature::Deadlines => "deadlines",
        }
    }

    pub fn parse(s: &str) -> Option<Feature> {
        match s {
            "success_criteria" => Some(Feature::SuccessCriteria),
            "feedback" => Some(Feature::Feedback),
            "telemetry" => Some(Feature::Telemetry),
            "completion_summaries" => Some(Feature::CompletionSummaries),
            "time_tracking" => Some(Feature::TimeTracking),
            "deadlines" => Some(Feature::Deadlines),
            _ => None,
        }
    }

    pub const ALL: [Feature; 6] = [
        Feature::SuccessCriteria,
        Feature::Feedback,
        Feature::Telemetry,
        Feature::CompletionSummaries,
        Feature::TimeTracking,
        Feature::Deadlines,
    ];
}

/// Enforcement strictness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    Strict,
    #[default]
    Standard,
    Advisory,
}

impl EnforcementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementLevel::Strict => "strict",
            EnforcementLevel::Standard => "standard",
            EnforcementLevel::Advisory => "advisory",
        }
    }

    pub fn parse(s: &str) -> Option<EnforcementLevel> {
        match s {
            "strict" => Some(EnforcementLevel::Strict),
            "standard" => Some(EnforcementLevel::Standard),
            "advisory" => Some(EnforcementLevel::Advisory),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnforcementLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Feature toggle block. Everything defaults to enabled; `minimal_mode`
/// switches every core-loop feature off regardless of individual flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Features {
    #[serde(default = "default_true")]
    pub success_criteria: bool,
    #[serde(default = "default_true")]
    pub feedback: bool,
    #[serde(default = "default_true")]
    pub telemetry: bool,
    #[serde(default = "default_true")]
    pub completion_summaries: bool,
    #[serde(default = "default_true")]
    pub time_tracking: bool,
    #[serde(default = "default_true")]
    pub deadlines: bool,
    #[serde(default)]
    pub minimal_mode: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            success_criteria: true,
            feedback: true,
            telemetry: true,
            completion_summaries: true,
            time_tracking: true,
            deadlines: true,
            minimal_mode: false,
        }
    }
}

/// Enforcement gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enforcement {
    #[serde(default)]
    pub level: EnforcementLevel,
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    #[serde(default)]
    pub enforced: bool,
}

impl Default for Enforcement {
    fn default() -> Self {
        Self {
            level: EnforcementLevel::Standard,
            auto_detect: true,
            enforced: false,
        }
    }
}

/// Process-wide configuration state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Settings {
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub enforcement: Enforcement,
}

impl Settings {
    /// Load from `<state_dir>/config.yaml`; a missing file yields defaults.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw).map_err(|e| {
                TmError::validation("config", format!("malformed {CONFIG_FILE}: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(TmError::PermissionDenied(path.display().to_string()))
            }
            Err(e) => Err(TmError::StorageUnavailable(format!(
                "reading {}: {e}",
                path.display()
            ))),
        }
    }

    /// Persist to `<state_dir>/config.yaml`. Callers hold the state lock.
    pub fn save(&self, state_dir: &Path) -> Result<()> {
        let path = state_dir.join(CONFIG_FILE);
        let raw = serde_yaml::to_string(self)
            .map_err(|e| TmError::Internal(format!("serializing config: {e}")))?;
        std::fs::write(&path, raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                TmError::PermissionDenied(path.display().to_string())
            }
            _ => TmError::StorageUnavailable(format!("writing {}: {e}", path.display())),
        })
    }

    /// Effective state of a feature, with `minimal_mode` applied.
    pub fn enabled(&self, feature: Feature) -> bool {
        if self.features.minimal_mode {
            return false;
        }
        match feature {
            Feature::SuccessCriteria => self.features.success_criteria,
            Feature::Feedback => self.features.feedback,
            Feature::Telemetry => self.features.telemetry,
            Feature::CompletionSummaries => self.features.completion_summaries,
            Feature::TimeTracking => self.features.time_tracking,
            Feature::Deadlines => self.features.deadlines,
        }
    }

    /// Flip one feature flag (does not touch `minimal_mode`).
    pub fn set_feature(&mut self, feature: Feature, on: bool) {
        match feature {
            Feature::SuccessCriteria => self.features.success_criteria = on,
            Feature::Feedback => self.features.feedback = on,
            Feature::Telemetry => self.features.telemetry = on,
            Feature::CompletionSummaries => self.features.completion_summaries = on,
            Feature::TimeTracking => self.features.time_tracking = on,
            Feature::Deadlines => self.features.deadlines = on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_enable_everything() {
        let settings = Settings::default();
        for feature in Feature::ALL {
            assert!(settings.enabled(feature), "{feature:?} should default on");
        }
        assert_eq!(settings.enforcement.level, EnforcementLevel::Standard);
        assert!(settings.enforcement.auto_detect);
        assert!(!settings.enforcement.enforced);
    }

    #[test]
    fn minimal_mode_wins() {
        let mut settings = Settings::default();
        settings.features.minimal_mode = true;
        for feature in Feature::ALL {
            assert!(!settings.enabled(feature));
        }
        // Individual flags untouched underneath
        assert!(settings.features.feedback);
    }

    #[test]
    fn round_trip_through_yaml() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.set_feature(Feature::Telemetry, false);
        settings.enforcement.level = EnforcementLevel::Strict;
        settings.enforcement.enforced = true;
        settings.save(dir.path()).unwrap();

        let loaded = Settings::load(dir.path()).unwrap();
        assert_eq!(loaded, settings);
        assert!(!loaded.enabled(Feature::Telemetry));
        assert!(loaded.enabled(Feature::Feedback));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = Settings::load(dir.path()).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "features:\n  telemetry: false\n",
        )
        .unwrap();
        let loaded = Settings::load(dir.path()).unwrap();
        assert!(!loaded.enabled(Feature::Telemetry));
        assert!(loaded.enabled(Feature::SuccessCriteria));
    }

    #[test]
    fn malformed_yaml_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), ":: not yaml ::").unwrap();
        let err = Settings::load(dir.path()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn feature_names_round_trip() {
        for feature in Feature::ALL {
            assert_eq!(Feature::parse(feature.as_str()), Some(feature));
        }
        assert_eq!(Feature::parse("minimal_mode"), None);
        assert_eq!(EnforcementLevel::parse("strict"), Some(EnforcementLevel::Strict));
        assert_eq!(EnforcementLevel::parse("loose"), None);
    }
}
