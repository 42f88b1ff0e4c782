//! Pre-operation enforcement gate.
//!
//! The CLI consults the gate before running an orchestrated command. The
//! gate never executes anything itself; it inspects the invocation
//! environment and returns a verdict plus remediation guidance. Enforcement
//! is not an error class: only the CLI converts a `Block` verdict into
//! `TmError::EnforcementBlocked`.

use crate::paths;
use crate::settings::{EnforcementLevel, Settings};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sentinel markers for the Commander's Intent convention.
pub const INTENT_MARKERS: [&str; 3] = ["WHY:", "WHAT:", "DONE:"];

/// Gate decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Preconditions satisfied; proceed
    Allow,
    /// Violations found; display guidance, confirm at standard level
    Warn,
    /// Strict level: the operation must not execute
    Block,
}

/// Violation categories the gate can report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    AgentIdMissing,
    StoreUninitialized,
    NoIntentContext,
    ExecutableNotFound,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::AgentIdMissing => "agent_id_missing",
            ViolationCategory::StoreUninitialized => "store_uninitialized",
            ViolationCategory::NoIntentContext => "no_intent_context",
            ViolationCategory::ExecutableNotFound => "executable_not_found",
        }
    }
}

/// One violation with machine-readable remediation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub category: ViolationCategory,
    pub fix: String,
    pub example: String,
}

impl Violation {
    fn agent_id_missing() -> Self {
        Self {
            category: ViolationCategory::AgentIdMissing,
            fix: "export an agent identity before orchestrated commands".to_string(),
            example: "export TM_AGENT_ID=backend-dev".to_string(),
        }
    }

    fn store_uninitialized() -> Self {
        Self {
            category: ViolationCategory::StoreUninitialized,
            fix: "initialize the task store in the project root".to_string(),
            example: "tm init".to_string(),
        }
    }

    fn no_intent_context() -> Self {
        Self {
            category: ViolationCategory::NoIntentContext,
            fix: "describe the task with WHY:/WHAT:/DONE: intent markers".to_string(),
            example: "tm add \"Ship login\" -d \"WHY: unblock beta WHAT: oauth flow DONE: e2e green\""
                .to_string(),
        }
    }
}

/// Snapshot of the invocation environment the gate inspects. Built once by
/// the CLI so the gate itself stays deterministic and testable.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    /// `identity::configured()` at invocation time
    pub agent_configured: bool,
    pub state_dir: &'a Path,
    /// `Some(description)` for operations that create task intent (the
    /// description may itself be absent); `None` when the intent check
    /// does not apply to the operation.
    pub intent: Option<Option<&'a str>>,
}

/// Result of a gate evaluation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GateOutcome {
    pub verdict: Verdict,
    pub level: EnforcementLevel,
    pub violations: Vec<Violation>,
}

impl GateOutcome {
    pub fn allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Whether the gate is active for this invocation.
///
/// Auto-active when any of: an agent identity is configured, a sibling
/// `.claude` directory exists, the state directory exists, or the
/// configuration forces it. `auto_detect: false` limits activation to the
/// forced case.
pub fn active(settings: &Settings, agent_configured: bool, state_dir: &Path) -> bool {
    if settings.enforcement.enforced {
        return true;
    }
    if !settings.enforcement.auto_detect {
        return false;
    }
    if agent_configured || state_dir.is_dir() {
        return true;
    }
    state_dir
        .parent()
        .map(|project| project.join(".claude").is_dir())
        .unwrap_or(false)
}

/// True when the text carries at least one intent marker.
pub fn has_intent_markers(text: &str) -> bool {
    INTENT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Evaluate the gate for one operation. The intent check only runs at
/// standard and strict levels.
pub fn evaluate(settings: &Settings, input: GateInput<'_>) -> GateOutcome {
    let level = settings.enforcement.level;

    if !active(settings, input.agent_configured, input.state_dir) {
        return GateOutcome {
            verdict: Verdict::Allow,
            level,
            violations: Vec::new(),
        };
    }

    let mut violations = Vec::new();

    if !input.agent_configured {
        violations.push(Violation::agent_id_missing());
    }
    if !paths::initialized(input.state_dir) {
        violations.push(Violation::store_uninitialized());
    }
    if level != EnforcementLevel::Advisory {
        if let Some(description) = input.intent {
            let has_intent = description.map(has_intent_markers).unwrap_or(false);
            if !has_intent {
                violations.push(Violation::no_intent_context());
            }
        }
    }

    let verdict = if violations.is_empty() {
        Verdict::Allow
    } else if level == EnforcementLevel::Strict {
        Verdict::Block
    } else {
        Verdict::Warn
    };

    GateOutcome {
        verdict,
        level,
        violations,
    }
}
