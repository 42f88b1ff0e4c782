use crate::{
    error::{Result, TmError},
    models::{FileRef, NewTask, SuccessCriterion},
};

/// Maximum title length after trimming
pub const MAX_TITLE_LEN: usize = 500;
/// Completion summary bounds (when a summary is provided)
pub const MIN_SUMMARY_LEN: usize = 20;
pub const MAX_SUMMARY_LEN: usize = 2000;
/// Success criteria limits
pub const MAX_CRITERIA: usize = 10;
pub const MAX_CRITERION_LEN: usize = 500;
/// Feedback note limit
pub const MAX_FEEDBACK_NOTE_LEN: usize = 500;
/// Tag set cap; duplicates are collapsed before counting
pub const MAX_TAGS: usize = 16;

/// Field validators shared by the repository and the CLI.
pub struct Validator;

impl Validator {
    /// Title must be non-empty after trimming and at most 500 chars.
    /// Returns the trimmed title.
    pub fn title(raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TmError::empty_field("title"));
        }
        if trimmed.chars().count() > MAX_TITLE_LEN {
            return Err(TmError::validation(
                "title",
                format!("must be at most {MAX_TITLE_LEN} characters"),
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Completion summary is optional; when present it must be 20-2000 chars.
    pub fn summary(raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len < MIN_SUMMARY_LEN {
            return Err(TmError::validation(
                "summary",
                format!("must be at least {MIN_SUMMARY_LEN} characters"),
            ));
        }
        if len > MAX_SUMMARY_LEN {
            return Err(TmError::validation(
                "summary",
                format!("must be at most {MAX_SUMMARY_LEN} characters"),
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Criteria array is capped at 10 entries of at most 500 chars each.
    pub fn criteria(criteria: &[SuccessCriterion]) -> Result<()> {
        if criteria.len() > MAX_CRITERIA {
            return Err(TmError::validation(
                "criteria",
                format!("at most {MAX_CRITERIA} entries allowed"),
            ));
        }
        for entry in criteria {
            if entry.criterion.trim().is_empty() {
                return Err(TmError::empty_field("criteria"));
            }
            if entry.criterion.chars().count() > MAX_CRITERION_LEN {
                return Err(TmError::validation(
                    "criteria",
                    format!("each criterion must be at most {MAX_CRITERION_LEN} characters"),
                ));
            }
        }
        Ok(())
    }

    /// Parse a raw JSON criteria argument into the typed form.
    pub fn criteria_json(raw: &str) -> Result<Vec<SuccessCriterion>> {
        let parsed: Vec<SuccessCriterion> = serde_json::from_str(raw)
            .map_err(|e| TmError::validation("criteria", format!("not a valid JSON array: {e}")))?;
        Self::criteria(&parsed)?;
        Ok(parsed)
    }

    /// File refs need a non-empty path and positive line numbers. Inverted
    /// ranges are normalized rather than rejected.
    pub fn file_refs(refs: Vec<FileRef>) -> Result<Vec<FileRef>> {
        let mut out = Vec::with_capacity(refs.len());
        for r in refs {
            if r.path.trim().is_empty() {
                return Err(TmError::empty_field("file"));
            }
            if r.line_start == 0 || r.line_end == Some(0) {
                return Err(TmError::validation("file", "line numbers are 1-based"));
            }
            out.push(r.normalized());
        }
        Ok(out)
    }

    /// Collapse duplicate tags preserving first-seen order, then cap.
    pub fn tags(tags: Vec<String>) -> Result<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for tag in tags {
            let tag = tag.trim().to_string();
            if tag.is_empty() {
                return Err(TmError::empty_field("tag"));
            }
            if seen.insert(tag.clone()) {
                out.push(tag);
            }
        }
        if out.len() > MAX_TAGS {
            return Err(TmError::validation(
                "tag",
                format!("at most {MAX_TAGS} distinct tags allowed"),
            ));
        }
        Ok(out)
    }

    /// Feedback scores are 1-5.
    pub fn score(field: &str, value: u8) -> Result<()> {
        if !(1..=5).contains(&value) {
            return Err(TmError::validation(field, "must be between 1 and 5"));
        }
        Ok(())
    }

    /// Feedback note is capped at 500 chars.
    pub fn feedback_note(raw: &str) -> Result<()> {
        if raw.chars().count() > MAX_FEEDBACK_NOTE_LEN {
            return Err(TmError::validation(
                "note",
                format!("must be at most {MAX_FEEDBACK_NOTE_LEN} characters"),
            ));
        }
        Ok(())
    }

    /// Hour values must be finite and non-negative.
    pub fn hours(field: &str, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(TmError::validation(field, "must be a non-negative number"));
        }
        Ok(())
    }

    /// Validate all fields of a new task, returning a normalized copy.
    pub fn new_task(mut task: NewTask) -> Result<NewTask> {
        task.title = Self::title(&task.title)?;
        if let Some(criteria) = &task.criteria {
            Self::criteria(criteria)?;
        }
        task.file_refs = Self::file_refs(task.file_refs)?;
        task.tags = Self::tags(task.tags)?;
        if let Some(hours) = task.estimated_hours {
            Self::hours("estimated-hours", hours)?;
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_bounds() {
        assert_eq!(Validator::title("  Fix login bug  ").unwrap(), "Fix login bug");
        assert!(Validator::title("").is_err());
        assert!(Validator::title("   ").is_err());
        assert!(Validator::title(&"x".repeat(500)).is_ok());
        assert!(Validator::title(&"x".repeat(501)).is_err());
    }

    #[test]
    fn summary_bounds() {
        assert!(Validator::summary("too short").is_err());
        assert!(Validator::summary(&"x".repeat(20)).is_ok());
        assert!(Validator::summary(&"x".repeat(2000)).is_ok());
        assert!(Validator::summary(&"x".repeat(2001)).is_err());
    }

    #[test]
    fn criteria_limits() {
        let one = |text: &str| SuccessCriterion {
            criterion: text.to_string(),
            measurable: None,
        };
        assert!(Validator::criteria(&vec![one("tests pass"); 10]).is_ok());
        assert!(Validator::criteria(&vec![one("tests pass"); 11]).is_err());
        assert!(Validator::criteria(&[one("")]).is_err());
        assert!(Validator::criteria(&[one(&"x".repeat(501))]).is_err());
    }

    #[test]
    fn criteria_json_parsing() {
        let parsed =
            Validator::criteria_json(r#"[{"criterion":"tests pass"},{"criterion":"docs updated","measurable":"CI green"}]"#)
                .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].measurable.as_deref(), Some("CI green"));

        assert!(Validator::criteria_json("not json").is_err());
        assert!(Validator::criteria_json(r#"{"criterion":"x"}"#).is_err());
    }

    #[test]
    fn file_ref_checks() {
        let ok = Validator::file_refs(vec![FileRef {
            path: "src/main.rs".to_string(),
            line_start: 30,
            line_end: Some(10),
        }])
        .unwrap();
        assert_eq!(ok[0].line_start, 10);
        assert_eq!(ok[0].line_end, Some(30));

        assert!(Validator::file_refs(vec![FileRef {
            path: "".to_string(),
            line_start: 1,
            line_end: None,
        }])
        .is_err());

        assert!(Validator::file_refs(vec![FileRef {
            path: "src/main.rs".to_string(),
            line_start: 0,
            line_end: None,
        }])
        .is_err());
    }

    #[test]
    fn tag_dedup_and_cap() {
        let tags = Validator::tags(vec![
            "backend".to_string(),
            "auth".to_string(),
            "backend".to_string(),
        ])
        .unwrap();
        assert_eq!(tags, vec!["backend", "auth"]);

        let many: Vec<String> = (0..17).map(|i| format!("tag{i}")).collect();
        assert!(Validator::tags(many).is_err());
        assert!(Validator::tags(vec![" ".to_string()]).is_err());
    }

    #[test]
    fn score_range() {
        for v in 1..=5u8 {
            assert!(Validator::score("quality", v).is_ok());
        }
        assert!(Validator::score("quality", 0).is_err());
        assert!(Validator::score("quality", 6).is_err());
    }

    #[test]
    fn hours_checks() {
        assert!(Validator::hours("estimated-hours", 0.0).is_ok());
        assert!(Validator::hours("estimated-hours", 2.5).is_ok());
        assert!(Validator::hours("estimated-hours", -1.0).is_err());
        assert!(Validator::hours("estimated-hours", f64::NAN).is_err());
        assert!(Validator::hours("estimated-hours", f64::INFINITY).is_err());
    }
}
