//! Comparison of an evaluation against the most recent prior run.

use crate::catalog::MetricCatalog;
use crate::error::Result;
use crate::scoring::weighted_score;
use crate::types::EvaluationResult;
use serde::{Deserialize, Serialize};

/// Overall-score movement (in points, either direction) that still counts
/// as `stable`. The bound itself is stable.
pub const TREND_STABILITY_BAND: f64 = 1.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

impl Trend {
    pub fn from_delta(score_delta: f64) -> Self {
        if score_delta > TREND_STABILITY_BAND {
            Trend::Improving
        } else if score_delta < -TREND_STABILITY_BAND {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    pub metric_id: String,
    pub previous: f64,
    pub current: f64,
    pub delta: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub previous_id: String,
    pub score_delta: f64,
    pub per_metric_delta: Vec<MetricDelta>,
    pub top_improvement: Option<MetricDelta>,
    pub top_regression: Option<MetricDelta>,
    pub trend: Trend,
}

/// Pick the latest result completed strictly before `current` completed.
pub fn select_previous<'a>(
    history: &'a [EvaluationResult],
    current: &EvaluationResult,
) -> Option<&'a EvaluationResult> {
    let cutoff = current.reference_time();
    history
        .iter()
        .filter(|r| r.id != current.id)
        .filter_map(|r| r.completed_at.map(|at| (at, r)))
        .filter(|(at, _)| *at < cutoff)
        .max_by(|(a, ra), (b, rb)| a.cmp(b).then_with(|| rb.id.cmp(&ra.id)))
        .map(|(_, r)| r)
}

/// Diff `current` against `previous`.
///
/// Returns `Ok(None)` when there is no previous result to compare with.
pub fn compare(
    catalog: &MetricCatalog,
    current: &EvaluationResult,
    previous: Option<&EvaluationResult>,
) -> Result<Option<TrendReport>> {
    let Some(previous) = previous else {
        return Ok(None);
    };

    let current_score = weighted_score(catalog, &current.scores)?;
    let previous_score = weighted_score(catalog, &previous.scores)?;
    let score_delta = current_score.overall - previous_score.overall;

    let mut per_metric_delta: Vec<MetricDelta> = current
        .scores
        .iter()
        .filter_map(|(id, &now)| {
            let before = *previous.scores.get(id)?;
            let delta = now - before;
            let percent_change = if before == 0.0 {
                0.0
            } else {
                delta / before * 100.0
            };
            Some(MetricDelta {
                metric_id: id.clone(),
                previous: before,
                current: now,
                delta,
                percent_change,
            })
        })
        .collect();
    per_metric_delta.sort_by(|a, b| a.metric_id.cmp(&b.metric_id));

    // Deltas are sorted by id, so keeping the first maximum breaks ties by id.
    let mut top_improvement: Option<&MetricDelta> = None;
    let mut top_regression: Option<&MetricDelta> = None;
    for d in &per_metric_delta {
        if d.delta > 0.0 && top_improvement.map_or(true, |best| d.delta > best.delta) {
            top_improvement = Some(d);
        }
        if d.delta < 0.0 && top_regression.map_or(true, |worst| d.delta < worst.delta) {
            top_regression = Some(d);
        }
    }
    let top_improvement = top_improvement.cloned();
    let top_regression = top_regression.cloned();

    Ok(Some(TrendReport {
        previous_id: previous.id.clone(),
        score_delta,
        per_metric_delta,
        top_improvement,
        top_regression,
        trend: Trend::from_delta(score_delta),
    }))
}
