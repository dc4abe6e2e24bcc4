//! Score report: weighted score plus grade in one presentation-ready value.

use crate::catalog::MetricCatalog;
use crate::error::Result;
use crate::grade::{classify, Grade, MetricWarning};
use crate::scoring::{weighted_score, Reliability};
use crate::types::MetricScores;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub overall: f64,
    pub evaluated_metrics: usize,
    pub grade: Grade,
    pub reliability: Reliability,
    pub warnings: Vec<MetricWarning>,
}

pub fn score_report(
    catalog: &MetricCatalog,
    scores: &MetricScores,
    warning_floor: f64,
) -> Result<ScoreReport> {
    let weighted = weighted_score(catalog, scores)?;
    let grade = classify(catalog, weighted.overall, scores, warning_floor);
    Ok(ScoreReport {
        overall: weighted.overall,
        evaluated_metrics: weighted.evaluated_metrics,
        warnings: grade.warnings.clone(),
        grade,
        reliability: weighted.reliability,
    })
}
