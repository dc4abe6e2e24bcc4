//! Events emitted while a triage run progresses.
//!
//! Subscribe via [`crate::triage::FailureTriage::subscribe`] to drive
//! progress displays or logs. Events are best effort: a lagging or dropped
//! subscriber never slows the run down.

use crate::cost::CostAlert;
use crate::types::{DiagnosisSummary, FailureType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TriageEvent {
    /// Triage of an evaluation started.
    TriageStarted {
        evaluation_id: String,
        total_failed: u64,
    },

    /// Stage 1 finished.
    HeuristicsCompleted {
        trivial_failures: u64,
        retrieval_failures: u64,
        ambiguous_cases: u64,
    },

    /// Stage 2 finished; `sampled` cases go to the judge.
    SamplingCompleted { ambiguous_cases: u64, sampled: u64 },

    /// A judge call settled successfully.
    CaseJudged {
        case_id: String,
        failure_type: FailureType,
        attempts: u32,
        cost_usd: f64,
    },

    /// A sampled case ended without a judge analysis.
    CaseNotAnalyzed { case_id: String, reason: String },

    /// A budget threshold was crossed by triage spend.
    BudgetAlert { alert: CostAlert },

    /// All sampled cases settled and the summary is final.
    TriageCompleted {
        evaluation_id: String,
        summary: DiagnosisSummary,
        cancelled: bool,
    },
}
