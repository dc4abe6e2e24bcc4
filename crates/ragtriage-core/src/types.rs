//! Shared data types for ragtriage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metric id → score in `[0, 1]`. Only evaluated metrics are present.
pub type MetricScores = HashMap<String, f64>;

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricTier {
    Critical,
    Important,
    Supplementary,
    Auxiliary,
}

impl MetricTier {
    pub fn weight(self) -> f64 {
        match self {
            MetricTier::Critical => 3.0,
            MetricTier::Important => 2.0,
            MetricTier::Supplementary => 1.5,
            MetricTier::Auxiliary => 1.0,
        }
    }
}

/// Which half of the RAG pipeline a metric mostly reflects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Retrieval,
    Generation,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Retrieval => "retrieval",
            PipelineStage::Generation => "generation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: String,
    pub tier: MetricTier,
    pub weight: f64,
    #[serde(default)]
    pub requires_judge: bool,
    pub stage: PipelineStage,
}

impl Metric {
    pub fn new(id: &str, tier: MetricTier, stage: PipelineStage, requires_judge: bool) -> Self {
        Self {
            id: id.to_string(),
            tier,
            weight: tier.weight(),
            requires_judge,
            stage,
        }
    }
}

// ============================================================================
// EVALUATION RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub id: String,
    #[serde(default)]
    pub scores: MetricScores,
    #[serde(default)]
    pub failed_cases: Vec<FailedCase>,
    #[serde(default)]
    pub diagnosis_summary: Option<DiagnosisSummary>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvaluationResult {
    /// The instant used when ordering results against each other.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.started_at)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DiagnosisMethod {
    Heuristic,
    #[serde(rename = "LLMJudge")]
    LlmJudge,
    #[default]
    NotAnalyzed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RootCause {
    Retrieval,
    Generation,
    Both,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicLabel {
    TrivialFailure,
    RetrievalFailure,
    Ambiguous,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedCase {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub expected_answer: String,
    #[serde(default)]
    pub generated_answer: String,
    pub score: f64,
    pub failing_metric: String,
    #[serde(default)]
    pub metric_scores: MetricScores,
    #[serde(default)]
    pub retrieved_contexts: Vec<String>,
    #[serde(default)]
    pub root_cause: Option<RootCause>,
    #[serde(default)]
    pub diagnosis_method: DiagnosisMethod,
    #[serde(default)]
    pub heuristic_label: Option<HeuristicLabel>,
    #[serde(default)]
    pub llm_judge_analysis: Option<RootCauseAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_error: Option<String>,
    #[serde(default)]
    pub judge_attempts: u32,
}

// ============================================================================
// JUDGE ANALYSIS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureType {
    #[serde(alias = "retrieval", alias = "RETRIEVAL")]
    Retrieval,
    #[serde(alias = "generation", alias = "GENERATION")]
    Generation,
    #[serde(alias = "both", alias = "BOTH")]
    Both,
}

impl From<FailureType> for RootCause {
    fn from(value: FailureType) -> Self {
        match value {
            FailureType::Retrieval => RootCause::Retrieval,
            FailureType::Generation => RootCause::Generation,
            FailureType::Both => RootCause::Both,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootCauseAnalysis {
    pub failure_type: FailureType,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub advice: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "promptVersion")]
    pub prompt_version: Option<String>,
}

// ============================================================================
// DIAGNOSIS SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiagnosisBreakdown {
    pub trivial_failures: u64,
    pub retrieval_failures: u64,
    pub ambiguous_cases: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiagnosisSummary {
    pub total_failed: u64,
    pub heuristic_classified: u64,
    pub llm_judge_analyzed: u64,
    pub not_analyzed: u64,
    pub diagnosis_cost: f64,
    pub breakdown: DiagnosisBreakdown,
}

impl DiagnosisSummary {
    /// Share of failed cases that did not need a paid judge call.
    pub fn cost_savings_percent(&self) -> f64 {
        if self.total_failed == 0 {
            return 0.0;
        }
        100.0 * (1.0 - self.llm_judge_analyzed as f64 / self.total_failed as f64)
    }

    /// The counting invariants every summary must satisfy.
    pub fn is_consistent(&self) -> bool {
        self.heuristic_classified + self.llm_judge_analyzed + self.not_analyzed
            == self.total_failed
            && self.breakdown.ambiguous_cases
                == self.total_failed.saturating_sub(self.heuristic_classified)
    }

    /// Whether trivial + retrieval failures add up to the heuristic count.
    ///
    /// Reported, never enforced: callers decide what a mismatch means.
    pub fn breakdown_matches_heuristics(&self) -> bool {
        self.breakdown.trivial_failures + self.breakdown.retrieval_failures
            == self.heuristic_classified
    }
}
