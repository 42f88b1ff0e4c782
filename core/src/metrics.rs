//! Aggregation math for the metrics report.
//!
//! The repository fetches the raw rows for the requested window; the
//! arithmetic lives here so it can be tested without a store.

use crate::models::Metrics;

/// Raw per-task inputs for one completed task in the window.
#[derive(Debug, Clone, Default)]
pub struct TaskSample {
    pub id: String,
    pub feedback_quality: Option<u8>,
    pub feedback_timeliness: Option<u8>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    /// True when some other task's `rework_of` points at this task
    pub was_reworked: bool,
}

/// Estimation accuracy across tasks with both estimate and actual:
/// `1 - mean(|est - act| / max(est, act))`, clamped to [0, 1].
/// Returns `None` when no task has both values.
pub fn estimation_accuracy(samples: &[TaskSample]) -> Option<f64> {
    let deviations: Vec<f64> = samples
        .iter()
        .filter_map(|s| match (s.estimated_hours, s.actual_hours) {
            (Some(est), Some(act)) if est >= 0.0 && act >= 0.0 => {
                let denom = est.max(act);
                if denom == 0.0 {
                    // Estimated zero, took zero: a perfect estimate
                    Some(0.0)
                } else {
                    Some((est - act).abs() / denom)
                }
            }
            _ => None,
        })
        .collect();

    if deviations.is_empty() {
        return None;
    }
    let mean = deviations.iter().sum::<f64>() / deviations.len() as f64;
    Some((1.0 - mean).clamp(0.0, 1.0))
}

/// Share of low-quality tasks (feedback quality <= 2) that some other task
/// reworks. `None` when there are no low-quality tasks in the window.
pub fn rework_correlation(samples: &[TaskSample]) -> Option<f64> {
    let low: Vec<&TaskSample> = samples
        .iter()
        .filter(|s| matches!(s.feedback_quality, Some(q) if q <= 2))
        .collect();
    if low.is_empty() {
        return None;
    }
    let reworked = low.iter().filter(|s| s.was_reworked).count();
    Some(reworked as f64 / low.len() as f64)
}

fn mean_score(scores: impl Iterator<Item = u8>) -> Option<f64> {
    let values: Vec<u8> = scores.collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64)
}

/// Assemble the full metrics report from the window's samples.
pub fn aggregate(samples: &[TaskSample]) -> Metrics {
    let with_feedback = samples
        .iter()
        .filter(|s| s.feedback_quality.is_some() || s.feedback_timeliness.is_some())
        .count() as u64;

    Metrics {
        completed_tasks: samples.len() as u64,
        tasks_with_feedback: with_feedback,
        avg_quality: mean_score(samples.iter().filter_map(|s| s.feedback_quality)),
        avg_timeliness: mean_score(samples.iter().filter_map(|s| s.feedback_timeliness)),
        estimation_accuracy: estimation_accuracy(samples),
        rework_correlation: rework_correlation(samples),
    }
}
