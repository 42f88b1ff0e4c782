//! Success-criteria evaluation for validated completion.

use crate::{
    error::{Result, TmError},
    models::{CheckStatus, CriteriaReport, CriterionCheck, SuccessCriterion},
};

/// Evaluate a task's criteria against caller-supplied confirmations.
///
/// There are no automated checkers yet, so every criterion defaults to
/// `manual` and relies on the caller marking it true or false. Missing
/// confirmations stay `manual`, which counts as unmet.
pub fn evaluate(
    criteria: &[SuccessCriterion],
    confirmations: Option<&[bool]>,
) -> CriteriaReport {
    let checks = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let (status, detail) = match confirmations.and_then(|v| v.get(i)) {
                Some(true) => (CheckStatus::Pass, None),
                Some(false) => (CheckStatus::Fail, Some("marked false".to_string())),
                None => (
                    CheckStatus::Manual,
                    Some("confirmation required".to_string()),
                ),
            };
            CriterionCheck {
                criterion: c.criterion.clone(),
                status,
                detail,
            }
        })
        .collect();
    CriteriaReport { checks }
}

/// Run the completion gate: produce the report and reject with
/// `CriteriaUnmet` when anything failed or stayed unconfirmed, unless the
/// caller forced completion.
pub fn gate(
    criteria: &[SuccessCriterion],
    confirmations: Option<&[bool]>,
    force: bool,
) -> Result<CriteriaReport> {
    let report = evaluate(criteria, confirmations);
    if report.satisfied() || force {
        Ok(report)
    } else {
        Err(TmError::CriteriaUnmet { report })
    }
}
