use std::env;

/// Environment variable carrying the agent identity.
pub const AGENT_ID_VAR: &str = "TM_AGENT_ID";

/// Identity used when nothing else is configured.
pub const DEFAULT_AGENT: &str = "default";

/// Resolve the calling agent's identity.
///
/// Resolution order: explicit caller argument, then `TM_AGENT_ID`, then
/// `"default"`. Resolved once per invocation and passed through the call
/// tree; never persisted except as plain strings on records.
pub fn resolve(explicit: Option<&str>) -> String {
    if let Some(id) = explicit {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    match env::var(AGENT_ID_VAR) {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => DEFAULT_AGENT.to_string(),
    }
}

/// Whether an agent identity is configured at all (used by the
/// enforcement gate; the `default` fallback does not count).
pub fn configured() -> bool {
    env::var(AGENT_ID_VAR)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests share process state; keep them in one test to avoid
    // interleaving with parallel test threads.
    #[test]
    fn resolution_order() {
        env::remove_var(AGENT_ID_VAR);
        assert_eq!(resolve(None), "default");
        assert!(!configured());

        env::set_var(AGENT_ID_VAR, "alice");
        assert_eq!(resolve(None), "alice");
        assert!(configured());

        // Explicit argument wins over the environment
        assert_eq!(resolve(Some("bob")), "bob");
        assert_eq!(resolve(Some("  ")), "alice");

        env::set_var(AGENT_ID_VAR, "   ");
        assert_eq!(resolve(None), "default");
        assert!(!configured());

        env::remove_var(AGENT_ID_VAR);
    }
}
