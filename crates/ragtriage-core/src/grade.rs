//! Grade classification, critical-metric warnings and recommendations.

use crate::catalog::MetricCatalog;
use crate::types::{MetricScores, MetricTier, PipelineStage};
use serde::{Deserialize, Serialize};

/// Critical-tier metrics below this value always produce a warning.
pub const DEFAULT_WARNING_FLOOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GradeLevel {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl GradeLevel {
    /// Inclusive lower bounds: 90, 80, 70, 60.
    pub fn from_score(overall: f64) -> Self {
        if overall >= 90.0 {
            GradeLevel::Excellent
        } else if overall >= 80.0 {
            GradeLevel::Good
        } else if overall >= 70.0 {
            GradeLevel::Fair
        } else if overall >= 60.0 {
            GradeLevel::Poor
        } else {
            GradeLevel::Critical
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GradeLevel::Excellent => "🏆 Excellent",
            GradeLevel::Good => "✅ Good",
            GradeLevel::Fair => "⚠️ Fair",
            GradeLevel::Poor => "🔶 Poor",
            GradeLevel::Critical => "🚨 Critical",
        }
    }

    fn description(self) -> &'static str {
        match self {
            GradeLevel::Excellent => "The pipeline answers accurately and stays grounded in its context.",
            GradeLevel::Good => "The pipeline performs well with minor weaknesses.",
            GradeLevel::Fair => "The pipeline works but shows noticeable quality gaps.",
            GradeLevel::Poor => "The pipeline fails often enough to affect users.",
            GradeLevel::Critical => "The pipeline is not fit for use in its current state.",
        }
    }

    fn lead(self) -> &'static str {
        match self {
            GradeLevel::Excellent => "Keep monitoring for regressions.",
            GradeLevel::Good => "Targeted tuning should lift the score further.",
            GradeLevel::Fair => "Prioritize improvements before wider rollout.",
            GradeLevel::Poor => "Significant rework is needed.",
            GradeLevel::Critical => "Stop and fix fundamental issues before release.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricWarning {
    pub metric_id: String,
    pub value: f64,
    pub floor: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grade {
    pub level: GradeLevel,
    pub label: String,
    pub description: String,
    pub recommendation: String,
    pub warnings: Vec<MetricWarning>,
}

/// Classify an overall score, flagging weak critical metrics.
pub fn classify(
    catalog: &MetricCatalog,
    overall: f64,
    scores: &MetricScores,
    warning_floor: f64,
) -> Grade {
    let level = GradeLevel::from_score(overall);

    let mut warnings: Vec<MetricWarning> = catalog
        .by_tier(MetricTier::Critical)
        .filter_map(|metric| {
            let value = *scores.get(&metric.id)?;
            (value.is_finite() && value < warning_floor).then(|| MetricWarning {
                metric_id: metric.id.clone(),
                value,
                floor: warning_floor,
                message: format!(
                    "{} is {:.2}, below the {:.2} floor for critical metrics",
                    metric.id, value, warning_floor
                ),
            })
        })
        .collect();
    warnings.sort_by(|a, b| a.metric_id.cmp(&b.metric_id));

    let recommendation = match weaker_stage(catalog, scores, warning_floor) {
        Some((stage, avg)) => format!(
            "{} Focus on the {} stage first (average {:.2}).",
            level.lead(),
            stage.as_str(),
            avg
        ),
        None => format!(
            "{} Neither retrieval nor generation stands out as the weaker stage.",
            level.lead()
        ),
    };

    Grade {
        level,
        label: level.label().to_string(),
        description: level.description().to_string(),
        recommendation,
        warnings,
    }
}

fn stage_average(catalog: &MetricCatalog, scores: &MetricScores, stage: PipelineStage) -> Option<f64> {
    let mut values: Vec<(&str, f64)> = scores
        .iter()
        .filter(|(id, v)| {
            v.is_finite() && catalog.get(id).is_some_and(|m| m.stage == stage)
        })
        .map(|(id, v)| (id.as_str(), *v))
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.0.cmp(b.0));
    Some(values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64)
}

/// The stage with the lower average, if one can be identified.
fn weaker_stage(
    catalog: &MetricCatalog,
    scores: &MetricScores,
    floor: f64,
) -> Option<(PipelineStage, f64)> {
    let retrieval = stage_average(catalog, scores, PipelineStage::Retrieval);
    let generation = stage_average(catalog, scores, PipelineStage::Generation);
    match (retrieval, generation) {
        (Some(r), Some(g)) if r < g => Some((PipelineStage::Retrieval, r)),
        (Some(_), Some(g)) => Some((PipelineStage::Generation, g)),
        (Some(r), None) if r < floor => Some((PipelineStage::Retrieval, r)),
        (None, Some(g)) if g < floor => Some((PipelineStage::Generation, g)),
        _ => None,
    }
}
