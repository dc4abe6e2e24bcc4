//! Failure triage: explain why failed cases failed, cheaply.
//!
//! A run goes through three stages:
//!
//! 1. [`heuristics`]: free rules settle trivial and retrieval failures.
//! 2. [`sampling`]: a seeded, stratified sample of the remaining ambiguous
//!    cases is chosen for judging.
//! 3. [`worker`]: a bounded pool of workers asks the [`Judge`] about each
//!    sampled case, retrying transient errors.
//!
//! The summary is only built once every sampled case reached a terminal
//! state, so its counts always add up to the number of failed cases.

pub mod heuristics;
pub mod sampling;
pub mod summary;
pub mod worker;

use crate::config::TriageConfig;
use crate::cost::{CostAccountant, CostEntry};
use crate::error::{Result, TriageError};
use crate::events::TriageEvent;
use crate::judge::{Judge, JudgeRequest, JudgeUsage};
use crate::retry::RetryPolicy;
use crate::types::{
    DiagnosisMethod, DiagnosisSummary, EvaluationResult, FailedCase, HeuristicLabel, RootCause,
};
use heuristics::HeuristicThresholds;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use worker::{JudgeOutcome, JudgePool, JudgeResult, JudgeTask};

pub use summary::summarize;

const CANCELLED_REASON: &str = "cancelled";

pub struct FailureTriage {
    config: TriageConfig,
    judge: Arc<dyn Judge>,
    accountant: Arc<CostAccountant>,
    event_tx: broadcast::Sender<TriageEvent>,
    cancel: CancellationToken,
}

impl FailureTriage {
    pub fn new(
        config: TriageConfig,
        judge: Arc<dyn Judge>,
        accountant: Arc<CostAccountant>,
    ) -> Result<Self> {
        sampling::validate(&config.sampling)?;
        let (event_tx, _) = broadcast::channel(1024);
        Ok(Self {
            config,
            judge,
            accountant,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.event_tx.subscribe()
    }

    /// Cancelling the token stops new judge calls and abandons in-flight ones.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn accountant(&self) -> &Arc<CostAccountant> {
        &self.accountant
    }

    fn emit(&self, event: TriageEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries, self.config.backoff_ms)
            .with_max_backoff(self.config.max_backoff_ms)
    }

    /// Triage every failed case of `evaluation`, annotating the cases in
    /// place and attaching the resulting summary.
    pub async fn run(&self, evaluation: &mut EvaluationResult) -> Result<DiagnosisSummary> {
        if evaluation.diagnosis_summary.is_some() {
            return Err(TriageError::AlreadyDiagnosed(evaluation.id.clone()));
        }

        let evaluation_id = evaluation.id.clone();
        let total = evaluation.failed_cases.len();
        info!(evaluation_id = %evaluation_id, total_failed = total, "Starting triage");
        self.emit(TriageEvent::TriageStarted {
            evaluation_id: evaluation_id.clone(),
            total_failed: total as u64,
        });

        // Stage 1: heuristics
        let thresholds = HeuristicThresholds::from(&self.config);
        let mut ambiguous = Vec::new();
        let (mut trivial, mut retrieval) = (0u64, 0u64);
        for (index, case) in evaluation.failed_cases.iter_mut().enumerate() {
            let label = heuristics::classify(case, &thresholds);
            match label {
                HeuristicLabel::TrivialFailure => trivial += 1,
                HeuristicLabel::RetrievalFailure => retrieval += 1,
                HeuristicLabel::Ambiguous => ambiguous.push(index),
            }
            heuristics::apply(case, label);
        }
        info!(trivial, retrieval, ambiguous = ambiguous.len(), "Heuristics complete");
        self.emit(TriageEvent::HeuristicsCompleted {
            trivial_failures: trivial,
            retrieval_failures: retrieval,
            ambiguous_cases: ambiguous.len() as u64,
        });

        // Stage 2: sampling
        let count = sampling::sample_count(&self.config.sampling, ambiguous.len())?;
        let selected: Vec<usize> = {
            let candidates: Vec<&FailedCase> = ambiguous
                .iter()
                .map(|&i| &evaluation.failed_cases[i])
                .collect();
            sampling::stratified_sample(&candidates, count, self.config.seed)
                .into_iter()
                .map(|pos| ambiguous[pos])
                .collect()
        };
        info!(
            ambiguous = ambiguous.len(),
            sampled = selected.len(),
            seed = self.config.seed,
            "Sampling complete"
        );
        self.emit(TriageEvent::SamplingCompleted {
            ambiguous_cases: ambiguous.len() as u64,
            sampled: selected.len() as u64,
        });

        // Stage 3: judge
        if !selected.is_empty() {
            self.judge_cases(evaluation, &selected).await;
        }

        let diagnosis_cost = self.accountant.diagnosis_cost(&evaluation_id);
        let summary = summarize(&evaluation.failed_cases, diagnosis_cost);
        if !summary.breakdown_matches_heuristics() {
            warn!(
                evaluation_id = %evaluation_id,
                trivial = summary.breakdown.trivial_failures,
                retrieval = summary.breakdown.retrieval_failures,
                heuristic_classified = summary.heuristic_classified,
                "Heuristic breakdown does not add up"
            );
        }

        let budgets = self.accountant.evaluate_budgets();
        for alert in &budgets.new_alerts {
            self.emit(TriageEvent::BudgetAlert {
                alert: alert.clone(),
            });
        }
        if budgets.blocks_new_runs() {
            warn!(blocked = ?budgets.blocked_budgets, "Budget hard limit reached during triage");
        }

        let cancelled = self.cancel.is_cancelled();
        info!(
            evaluation_id = %evaluation_id,
            heuristic = summary.heuristic_classified,
            judged = summary.llm_judge_analyzed,
            not_analyzed = summary.not_analyzed,
            cost_usd = summary.diagnosis_cost,
            cancelled,
            "Triage complete"
        );
        evaluation.diagnosis_summary = Some(summary.clone());
        self.emit(TriageEvent::TriageCompleted {
            evaluation_id,
            summary: summary.clone(),
            cancelled,
        });
        Ok(summary)
    }

    async fn judge_cases(&self, evaluation: &mut EvaluationResult, selected: &[usize]) {
        let tasks: Vec<JudgeTask> = selected
            .iter()
            .map(|&index| {
                let case = &evaluation.failed_cases[index];
                JudgeTask {
                    index,
                    request: JudgeRequest {
                        case_id: case.id.clone(),
                        question: case.question.clone(),
                        generated_answer: case.generated_answer.clone(),
                        expected_answer: case.expected_answer.clone(),
                        retrieved_contexts: case.retrieved_contexts.clone(),
                        failing_metric: case.failing_metric.clone(),
                    },
                }
            })
            .collect();

        let workers = self.config.concurrency.clamp(1, tasks.len());
        let mut pool = JudgePool::start(
            workers,
            self.judge.clone(),
            self.retry_policy(),
            self.cancel.clone(),
        );
        pool.push_batch(tasks).await;

        let mut pending: Vec<usize> = selected.to_vec();
        while !pending.is_empty() {
            let Some(result) = pool.recv().await else {
                break;
            };
            pending.retain(|&i| i != result.index);
            self.settle(evaluation, result);
        }
        pool.shutdown().await;

        // Workers only exit early if they panicked; keep the counts whole.
        for index in pending {
            let case = &mut evaluation.failed_cases[index];
            warn!(case_id = %case.id, "Judge worker exited before settling case");
            mark_not_analyzed(case, "worker exited".into());
            self.emit(TriageEvent::CaseNotAnalyzed {
                case_id: case.id.clone(),
                reason: "worker exited".into(),
            });
        }
    }

    fn settle(&self, evaluation: &mut EvaluationResult, result: JudgeResult) {
        let evaluation_id = evaluation.id.clone();
        let case = &mut evaluation.failed_cases[result.index];
        case.judge_attempts = result.outcome.attempts();

        match result.outcome {
            JudgeOutcome::Judged { verdict, attempts } => {
                let cost_usd = verdict.cost_usd();
                if let Some(usage) = &verdict.usage {
                    self.charge(usage, &result.failing_metric, evaluation_id);
                }
                let failure_type = verdict.analysis.failure_type;
                debug!(case_id = %result.case_id, ?failure_type, attempts, cost_usd, "Case judged");
                case.diagnosis_method = DiagnosisMethod::LlmJudge;
                case.root_cause = Some(RootCause::from(failure_type));
                case.llm_judge_analysis = Some(verdict.analysis);
                case.judge_error = None;
                self.emit(TriageEvent::CaseJudged {
                    case_id: result.case_id,
                    failure_type,
                    attempts,
                    cost_usd,
                });
            }
            JudgeOutcome::Failed { error, usage, .. } => {
                if let Some(usage) = &usage {
                    self.charge(usage, &result.failing_metric, evaluation_id);
                }
                mark_not_analyzed(case, error.clone());
                self.emit(TriageEvent::CaseNotAnalyzed {
                    case_id: result.case_id,
                    reason: error,
                });
            }
            JudgeOutcome::Cancelled { .. } => {
                mark_not_analyzed(case, CANCELLED_REASON.into());
                self.emit(TriageEvent::CaseNotAnalyzed {
                    case_id: result.case_id,
                    reason: CANCELLED_REASON.into(),
                });
            }
        }
    }

    /// Every billed judge call lands in the ledger, verdict or not.
    fn charge(&self, usage: &JudgeUsage, failing_metric: &str, evaluation_id: String) {
        self.accountant.record(
            CostEntry::new(usage.provider.clone(), usage.model.clone(), usage.cost_usd)
                .with_metric(failing_metric)
                .for_diagnosis(evaluation_id),
        );
    }
}

fn mark_not_analyzed(case: &mut FailedCase, error: String) {
    case.diagnosis_method = DiagnosisMethod::NotAnalyzed;
    case.root_cause = None;
    case.llm_judge_analysis = None;
    case.judge_error = Some(error);
}
