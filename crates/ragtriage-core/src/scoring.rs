//! Weighted aggregation of per-metric scores into one overall score.

use crate::catalog::MetricCatalog;
use crate::error::{Result, TriageError};
use crate::types::MetricScores;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fraction of catalog metrics that must be evaluated for a `high` rating.
pub const HIGH_RELIABILITY_RATIO: f64 = 0.83;
/// Fraction of catalog metrics that must be evaluated for a `medium` rating.
pub const MEDIUM_RELIABILITY_RATIO: f64 = 0.58;

const SCORE_PRECISION: f64 = 1e9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reliability {
    pub level: ReliabilityLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightedScore {
    /// Overall score in `[0, 100]`.
    pub overall: f64,
    pub evaluated_metrics: usize,
    pub reliability: Reliability,
}

/// Combine evaluated metric scores using catalog weights.
///
/// Metrics missing from `scores` are not evaluated and do not drag the
/// average down. Unknown ids and non-finite values are skipped.
pub fn weighted_score(catalog: &MetricCatalog, scores: &MetricScores) -> Result<WeightedScore> {
    let mut evaluated: Vec<(&str, f64, f64)> = Vec::with_capacity(scores.len());
    for (id, &value) in scores {
        let Some(metric) = catalog.get(id) else {
            warn!(metric = %id, "Ignoring score for metric missing from catalog");
            continue;
        };
        if !value.is_finite() {
            warn!(metric = %id, value, "Ignoring non-finite metric score");
            continue;
        }
        evaluated.push((id.as_str(), value.clamp(0.0, 1.0), metric.weight));
    }

    if evaluated.is_empty() {
        return Err(TriageError::InsufficientData);
    }

    // Fixed summation order keeps the result independent of map iteration.
    evaluated.sort_by(|a, b| a.0.cmp(b.0));
    let (weighted_sum, weight_total) = evaluated
        .iter()
        .fold((0.0, 0.0), |(sum, total), &(_, value, weight)| {
            (sum + value * weight, total + weight)
        });

    let overall = round_score(100.0 * weighted_sum / weight_total).clamp(0.0, 100.0);
    let reliability = reliability_for(evaluated.len(), catalog.len());

    Ok(WeightedScore {
        overall,
        evaluated_metrics: evaluated.len(),
        reliability,
    })
}

/// Snap to 1e-9 points so scores sitting exactly on a grade boundary are
/// not pushed below it by summation error.
fn round_score(raw: f64) -> f64 {
    (raw * SCORE_PRECISION).round() / SCORE_PRECISION
}

/// Rate how far an overall score can be trusted given metric coverage.
pub fn reliability_for(evaluated: usize, catalog_size: usize) -> Reliability {
    let ratio = if catalog_size == 0 {
        0.0
    } else {
        evaluated as f64 / catalog_size as f64
    };

    let level = if ratio >= HIGH_RELIABILITY_RATIO {
        ReliabilityLevel::High
    } else if ratio >= MEDIUM_RELIABILITY_RATIO {
        ReliabilityLevel::Medium
    } else {
        ReliabilityLevel::Low
    };

    let message = match level {
        ReliabilityLevel::High => {
            format!("{evaluated}/{catalog_size} metrics evaluated; the overall score is reliable")
        }
        ReliabilityLevel::Medium => format!(
            "{evaluated}/{catalog_size} metrics evaluated; the overall score is indicative"
        ),
        ReliabilityLevel::Low => format!(
            "Only {evaluated}/{catalog_size} metrics evaluated; treat the overall score with caution and evaluate more metrics before drawing conclusions"
        ),
    };

    Reliability { level, message }
}
