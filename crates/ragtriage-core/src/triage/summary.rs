//! Aggregation of per-case outcomes into a DiagnosisSummary.

use crate::types::{
    DiagnosisBreakdown, DiagnosisMethod, DiagnosisSummary, FailedCase, HeuristicLabel,
};

pub fn summarize(cases: &[FailedCase], diagnosis_cost: f64) -> DiagnosisSummary {
    let total_failed = cases.len() as u64;
    let count_method = |m: DiagnosisMethod| {
        cases.iter().filter(|c| c.diagnosis_method == m).count() as u64
    };
    let count_label = |l: HeuristicLabel| {
        cases
            .iter()
            .filter(|c| c.heuristic_label == Some(l))
            .count() as u64
    };

    let heuristic_classified = count_method(DiagnosisMethod::Heuristic);
    let llm_judge_analyzed = count_method(DiagnosisMethod::LlmJudge);

    DiagnosisSummary {
        total_failed,
        heuristic_classified,
        llm_judge_analyzed,
        not_analyzed: total_failed - heuristic_classified - llm_judge_analyzed,
        diagnosis_cost,
        breakdown: DiagnosisBreakdown {
            trivial_failures: count_label(HeuristicLabel::TrivialFailure),
            retrieval_failures: count_label(HeuristicLabel::RetrievalFailure),
            ambiguous_cases: total_failed - heuristic_classified,
        },
    }
}
