//! Stage 1: free, rule-based classification of failed cases.

use crate::config::TriageConfig;
use crate::types::{DiagnosisMethod, FailedCase, HeuristicLabel, RootCause};

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicThresholds {
    /// Cases scoring below this are trivial failures.
    pub trivial_score: f64,
    /// Context metric values below this are retrieval failures.
    pub retrieval: f64,
    pub context_metric: String,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self::from(&TriageConfig::default())
    }
}

impl From<&TriageConfig> for HeuristicThresholds {
    fn from(cfg: &TriageConfig) -> Self {
        Self {
            trivial_score: cfg.trivial_score_threshold,
            retrieval: cfg.retrieval_threshold,
            context_metric: cfg.context_metric.clone(),
        }
    }
}

/// Trivial is checked before retrieval. A missing context metric is not
/// evidence of a retrieval failure.
pub fn classify(case: &FailedCase, thresholds: &HeuristicThresholds) -> HeuristicLabel {
    if case.score < thresholds.trivial_score {
        return HeuristicLabel::TrivialFailure;
    }
    match case.metric_scores.get(&thresholds.context_metric) {
        Some(v) if *v < thresholds.retrieval => HeuristicLabel::RetrievalFailure,
        _ => HeuristicLabel::Ambiguous,
    }
}

/// Record the label on the case, dropping any diagnosis it arrived with.
/// Returns true when the case is finalized.
pub fn apply(case: &mut FailedCase, label: HeuristicLabel) -> bool {
    case.heuristic_label = Some(label);
    case.diagnosis_method = DiagnosisMethod::NotAnalyzed;
    case.root_cause = None;
    case.llm_judge_analysis = None;
    case.judge_error = None;
    case.judge_attempts = 0;
    match label {
        HeuristicLabel::TrivialFailure => {
            case.diagnosis_method = DiagnosisMethod::Heuristic;
            true
        }
        HeuristicLabel::RetrievalFailure => {
            case.diagnosis_method = DiagnosisMethod::Heuristic;
            case.root_cause = Some(RootCause::Retrieval);
            true
        }
        HeuristicLabel::Ambiguous => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureType, RootCauseAnalysis};
    use std::collections::HashMap;

    fn case(score: f64, recall: Option<f64>) -> FailedCase {
        let mut metric_scores = HashMap::new();
        if let Some(r) = recall {
            metric_scores.insert("context_recall".to_string(), r);
        }
        FailedCase {
            id: "c".into(),
            question: "q".into(),
            expected_answer: String::new(),
            generated_answer: String::new(),
            score,
            failing_metric: "faithfulness".into(),
            metric_scores,
            retrieved_contexts: vec![],
            root_cause: None,
            diagnosis_method: DiagnosisMethod::NotAnalyzed,
            heuristic_label: None,
            llm_judge_analysis: None,
            judge_error: None,
            judge_attempts: 0,
        }
    }

    #[test]
    fn trivial_wins_over_retrieval() {
        let t = HeuristicThresholds::default();
        assert_eq!(classify(&case(0.1, Some(0.0)), &t), HeuristicLabel::TrivialFailure);
        assert_eq!(classify(&case(0.5, Some(0.05)), &t), HeuristicLabel::RetrievalFailure);
        assert_eq!(classify(&case(0.5, Some(0.5)), &t), HeuristicLabel::Ambiguous);
    }

    #[test]
    fn missing_context_metric_is_ambiguous() {
        let t = HeuristicThresholds::default();
        assert_eq!(classify(&case(0.5, None), &t), HeuristicLabel::Ambiguous);
    }

    #[test]
    fn boundaries_are_exclusive() {
        let t = HeuristicThresholds::default();
        assert_eq!(classify(&case(0.2, Some(0.1)), &t), HeuristicLabel::Ambiguous);
    }

    #[test]
    fn trivial_keeps_root_cause_unset() {
        let mut c = case(0.0, None);
        assert!(apply(&mut c, HeuristicLabel::TrivialFailure));
        assert_eq!(c.diagnosis_method, DiagnosisMethod::Heuristic);
        assert!(c.root_cause.is_none());

        let mut c = case(0.5, Some(0.0));
        assert!(apply(&mut c, HeuristicLabel::RetrievalFailure));
        assert_eq!(c.root_cause, Some(RootCause::Retrieval));
    }

    #[test]
    fn stale_diagnosis_is_dropped() {
        let stale = |score: f64, recall: Option<f64>| FailedCase {
            root_cause: Some(RootCause::Both),
            diagnosis_method: DiagnosisMethod::LlmJudge,
            llm_judge_analysis: Some(RootCauseAnalysis {
                failure_type: FailureType::Both,
                reason: String::new(),
                summary: String::new(),
                advice: String::new(),
                confidence: None,
                model: None,
                prompt_version: None,
            }),
            judge_error: Some("old".into()),
            judge_attempts: 2,
            ..case(score, recall)
        };

        let mut trivial = stale(0.0, None);
        assert!(apply(&mut trivial, HeuristicLabel::TrivialFailure));
        assert_eq!(trivial.diagnosis_method, DiagnosisMethod::Heuristic);
        assert!(trivial.root_cause.is_none());
        assert!(trivial.llm_judge_analysis.is_none());
        assert!(trivial.judge_error.is_none());

        let mut ambiguous = stale(0.5, Some(0.5));
        assert!(!apply(&mut ambiguous, HeuristicLabel::Ambiguous));
        assert_eq!(ambiguous.diagnosis_method, DiagnosisMethod::NotAnalyzed);
        assert!(ambiguous.root_cause.is_none());
        assert!(ambiguous.llm_judge_analysis.is_none());
        assert_eq!(ambiguous.judge_attempts, 0);
    }
}
