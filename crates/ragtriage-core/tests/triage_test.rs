//! Tests for the triage orchestrator with scripted judges.

use async_trait::async_trait;
use chrono::Utc;
use ragtriage_core::config::{SamplingConfig, SamplingPreset, TriageConfig};
use ragtriage_core::cost::{Budget, CostAccountant, CostPurpose};
use ragtriage_core::events::TriageEvent;
use ragtriage_core::judge::{Judge, JudgeError, JudgeRequest, JudgeUsage, JudgeVerdict};
use ragtriage_core::triage::FailureTriage;
use ragtriage_core::types::{
    DiagnosisMethod, DiagnosisSummary, EvaluationResult, FailedCase, FailureType, HeuristicLabel,
    RootCause, RootCauseAnalysis,
};
use ragtriage_core::TriageError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const METRICS: [&str; 3] = ["faithfulness", "answer_correctness", "answer_relevancy"];

fn failed_case(id: String, score: f64, recall: f64, metric: &str) -> FailedCase {
    let mut metric_scores = HashMap::new();
    metric_scores.insert("context_recall".to_string(), recall);
    FailedCase {
        id,
        question: "What is the refund window?".into(),
        expected_answer: "30 days".into(),
        generated_answer: "14 days".into(),
        score,
        failing_metric: metric.into(),
        metric_scores,
        retrieved_contexts: vec!["Refunds are accepted within 30 days.".into()],
        root_cause: None,
        diagnosis_method: DiagnosisMethod::NotAnalyzed,
        heuristic_label: None,
        llm_judge_analysis: None,
        judge_error: None,
        judge_attempts: 0,
    }
}

fn evaluation(trivial: usize, retrieval: usize, ambiguous: usize) -> EvaluationResult {
    let mut cases = Vec::new();
    for i in 0..trivial {
        cases.push(failed_case(format!("trivial-{i:03}"), 0.1, 0.9, "faithfulness"));
    }
    for i in 0..retrieval {
        cases.push(failed_case(format!("retrieval-{i:03}"), 0.5, 0.05, "context_recall"));
    }
    for i in 0..ambiguous {
        cases.push(failed_case(
            format!("ambiguous-{i:03}"),
            0.5,
            0.8,
            METRICS[i % METRICS.len()],
        ));
    }
    EvaluationResult {
        id: "eval-1".into(),
        scores: HashMap::new(),
        failed_cases: cases,
        diagnosis_summary: None,
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
    }
}

fn verdict(cost_usd: f64) -> JudgeVerdict {
    JudgeVerdict {
        analysis: RootCauseAnalysis {
            failure_type: FailureType::Generation,
            reason: "answer contradicts context".into(),
            summary: "hallucinated window".into(),
            advice: "ground the answer in the context".into(),
            confidence: Some(0.9),
            model: Some("mock-1".into()),
            prompt_version: Some("root-cause-v1".into()),
        },
        usage: Some(JudgeUsage {
            provider: "mock".into(),
            model: "mock-1".into(),
            input_tokens: 100,
            output_tokens: 20,
            cost_usd,
        }),
    }
}

type Script = dyn Fn(&JudgeRequest, u32) -> Result<JudgeVerdict, JudgeError> + Send + Sync;

/// Judge driven by a closure of (request, attempt number).
struct ScriptedJudge {
    script: Box<Script>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    hang_ids: HashSet<String>,
}

impl ScriptedJudge {
    fn new(
        script: impl Fn(&JudgeRequest, u32) -> Result<JudgeVerdict, JudgeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            hang_ids: HashSet::new(),
        }
    }

    fn ok() -> Self {
        Self::new(|_, _| Ok(verdict(0.001)))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn hanging_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.hang_ids = ids.into_iter().collect();
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(request.case_id.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.hang_ids.contains(&request.case_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.script)(request, attempt)
    }

    fn kind(&self) -> &str {
        "scripted"
    }
}

fn config(sampling: SamplingConfig) -> TriageConfig {
    TriageConfig {
        sampling,
        backoff_ms: 1,
        max_backoff_ms: 5,
        ..TriageConfig::default()
    }
}

fn precise() -> SamplingConfig {
    SamplingConfig::Auto {
        preset: SamplingPreset::Precise,
    }
}

async fn run(
    cfg: TriageConfig,
    judge: Arc<ScriptedJudge>,
    eval: &mut EvaluationResult,
) -> DiagnosisSummary {
    let triage = FailureTriage::new(cfg, judge, Arc::new(CostAccountant::new())).unwrap();
    triage.run(eval).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn balanced_sampling_on_a_large_run() {
    let mut eval = evaluation(180, 35, 109);
    let judge = Arc::new(ScriptedJudge::ok());
    let summary = run(config(SamplingConfig::default()), judge.clone(), &mut eval).await;

    assert_eq!(summary.total_failed, 324);
    assert_eq!(summary.heuristic_classified, 215);
    assert_eq!(summary.llm_judge_analyzed, 22);
    assert_eq!(summary.not_analyzed, 87);
    assert_eq!(summary.breakdown.trivial_failures, 180);
    assert_eq!(summary.breakdown.retrieval_failures, 35);
    assert_eq!(summary.breakdown.ambiguous_cases, 109);
    assert!((summary.diagnosis_cost - 0.022).abs() < 1e-9);
    assert!(summary.is_consistent());
    assert!(summary.breakdown_matches_heuristics());
    assert!((summary.cost_savings_percent() - 100.0 * (1.0 - 22.0 / 324.0)).abs() < 1e-9);
    assert_eq!(judge.calls(), 22);
    assert_eq!(eval.diagnosis_summary.as_ref(), Some(&summary));
}

#[tokio::test(flavor = "multi_thread")]
async fn cases_are_annotated_by_stage() {
    let mut eval = evaluation(2, 2, 3);
    run(config(precise()), Arc::new(ScriptedJudge::ok()), &mut eval).await;

    for case in &eval.failed_cases {
        match case.heuristic_label {
            Some(HeuristicLabel::TrivialFailure) => {
                assert_eq!(case.diagnosis_method, DiagnosisMethod::Heuristic);
                assert_eq!(case.root_cause, None);
            }
            Some(HeuristicLabel::RetrievalFailure) => {
                assert_eq!(case.diagnosis_method, DiagnosisMethod::Heuristic);
                assert_eq!(case.root_cause, Some(RootCause::Retrieval));
            }
            Some(HeuristicLabel::Ambiguous) => {
                assert_eq!(case.diagnosis_method, DiagnosisMethod::LlmJudge);
                assert_eq!(case.root_cause, Some(RootCause::Generation));
                assert!(case.llm_judge_analysis.is_some());
                assert_eq!(case.judge_attempts, 1);
            }
            None => panic!("case {} has no heuristic label", case.id),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_ratio_judges_every_ambiguous_case() {
    let mut eval = evaluation(0, 0, 17);
    let summary = run(
        config(SamplingConfig::FixedRatio { ratio: 100.0 }),
        Arc::new(ScriptedJudge::ok()),
        &mut eval,
    )
    .await;
    assert_eq!(summary.llm_judge_analyzed, 17);
    assert_eq!(summary.not_analyzed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_failed_cases_never_calls_the_judge() {
    let mut eval = evaluation(0, 0, 0);
    let judge = Arc::new(ScriptedJudge::ok());
    let summary = run(config(precise()), judge.clone(), &mut eval).await;
    assert_eq!(summary, DiagnosisSummary::default());
    assert_eq!(judge.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_is_rejected() {
    let mut eval = evaluation(1, 0, 1);
    let triage = FailureTriage::new(
        config(precise()),
        Arc::new(ScriptedJudge::ok()),
        Arc::new(CostAccountant::new()),
    )
    .unwrap();
    triage.run(&mut eval).await.unwrap();
    let err = triage.run(&mut eval).await.unwrap_err();
    assert!(matches!(err, TriageError::AlreadyDiagnosed(id) if id == "eval-1"));
}

#[test]
fn invalid_sampling_fails_fast() {
    let err = FailureTriage::new(
        config(SamplingConfig::MaxCases { max_cases: 0 }),
        Arc::new(ScriptedJudge::ok()),
        Arc::new(CostAccountant::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, TriageError::InvalidSamplingConfig(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_errors_are_retried() {
    let judge = Arc::new(ScriptedJudge::new(|_, attempt| {
        if attempt < 3 {
            Err(JudgeError::Transient("429 Too Many Requests".into()))
        } else {
            Ok(verdict(0.002))
        }
    }));
    let mut eval = evaluation(0, 0, 4);
    let summary = run(config(precise()), judge.clone(), &mut eval).await;

    assert_eq!(summary.llm_judge_analyzed, 4);
    assert_eq!(judge.calls(), 12);
    assert!(eval.failed_cases.iter().all(|c| c.judge_attempts == 3));
    assert!((summary.diagnosis_cost - 0.008).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_leave_case_not_analyzed() {
    let judge = Arc::new(ScriptedJudge::new(|_, _| {
        Err(JudgeError::Transient("503 Service Unavailable".into()))
    }));
    let mut eval = evaluation(1, 0, 2);
    let cfg = TriageConfig {
        max_retries: 2,
        ..config(precise())
    };
    let summary = run(cfg, judge.clone(), &mut eval).await;

    assert_eq!(summary.heuristic_classified, 1);
    assert_eq!(summary.llm_judge_analyzed, 0);
    assert_eq!(summary.not_analyzed, 2);
    assert_eq!(judge.calls(), 6);
    assert_eq!(summary.diagnosis_cost, 0.0);
    for case in eval.failed_cases.iter().filter(|c| c.id.starts_with("ambiguous")) {
        assert_eq!(case.judge_attempts, 3);
        assert!(case.judge_error.as_deref().unwrap_or("").contains("503"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_errors_do_not_stop_the_batch() {
    let judge = Arc::new(ScriptedJudge::new(|req, _| {
        if req.case_id == "ambiguous-001" {
            Err(JudgeError::Permanent("400 Bad Request".into()))
        } else {
            Ok(verdict(0.001))
        }
    }));
    let mut eval = evaluation(0, 0, 5);
    let summary = run(config(precise()), judge.clone(), &mut eval).await;

    assert_eq!(summary.llm_judge_analyzed, 4);
    assert_eq!(summary.not_analyzed, 1);
    assert_eq!(judge.calls(), 5);
    let failed = eval
        .failed_cases
        .iter()
        .find(|c| c.id == "ambiguous-001")
        .unwrap();
    assert_eq!(failed.judge_attempts, 1);
    assert_eq!(failed.diagnosis_method, DiagnosisMethod::NotAnalyzed);
    assert!(failed.judge_error.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn in_flight_calls_stay_within_concurrency() {
    let judge = Arc::new(ScriptedJudge::ok().with_delay(Duration::from_millis(20)));
    let mut eval = evaluation(0, 0, 12);
    let cfg = TriageConfig {
        concurrency: 3,
        ..config(precise())
    };
    let summary = run(cfg, judge.clone(), &mut eval).await;

    assert_eq!(summary.llm_judge_analyzed, 12);
    let max = judge.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {max} calls in flight");
    assert!(max >= 2, "workers should overlap");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_keeps_settled_cases() {
    let hanging = (3..6).map(|i| format!("ambiguous-{i:03}"));
    let judge = Arc::new(ScriptedJudge::ok().hanging_on(hanging));
    let mut eval = evaluation(2, 0, 6);
    let cfg = TriageConfig {
        concurrency: 6,
        ..config(precise())
    };
    let triage = FailureTriage::new(cfg, judge, Arc::new(CostAccountant::new())).unwrap();

    let token = triage.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), triage.run(&mut eval))
        .await
        .expect("cancelled run should finish promptly")
        .unwrap();

    assert_eq!(summary.total_failed, 8);
    assert_eq!(summary.heuristic_classified, 2);
    assert_eq!(summary.llm_judge_analyzed, 3);
    assert_eq!(summary.not_analyzed, 3);
    assert!(summary.is_consistent());
    for case in &eval.failed_cases {
        if ["ambiguous-003", "ambiguous-004", "ambiguous-005"].contains(&case.id.as_str()) {
            assert_eq!(case.judge_error.as_deref(), Some("cancelled"));
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sampling_is_reproducible_across_input_order() {
    let mut forward = evaluation(0, 0, 40);
    let mut reversed = forward.clone();
    reversed.failed_cases.reverse();

    let cfg = config(SamplingConfig::MaxCases { max_cases: 7 });
    run(cfg.clone(), Arc::new(ScriptedJudge::ok()), &mut forward).await;
    run(cfg, Arc::new(ScriptedJudge::ok()), &mut reversed).await;

    let judged = |eval: &EvaluationResult| -> HashSet<String> {
        eval.failed_cases
            .iter()
            .filter(|c| c.diagnosis_method == DiagnosisMethod::LlmJudge)
            .map(|c| c.id.clone())
            .collect()
    };
    assert_eq!(judged(&forward).len(), 7);
    assert_eq!(judged(&forward), judged(&reversed));
}

#[tokio::test(flavor = "multi_thread")]
async fn judge_spend_is_charged_and_alerts_are_emitted() {
    let accountant = Arc::new(CostAccountant::with_budgets([
        Budget::new("triage", 0.01).with_thresholds(&[50.0, 80.0])
    ]));
    let triage = FailureTriage::new(
        config(precise()),
        Arc::new(ScriptedJudge::ok()),
        accountant.clone(),
    )
    .unwrap();
    let mut rx = triage.subscribe();

    let mut eval = evaluation(1, 1, 9);
    let summary = triage.run(&mut eval).await.unwrap();
    assert!((summary.diagnosis_cost - 0.009).abs() < 1e-9);

    let entries = accountant.entries();
    assert_eq!(entries.len(), 9);
    assert!(entries.iter().all(|e| e.purpose == CostPurpose::Diagnosis
        && e.evaluation_id.as_deref() == Some("eval-1")
        && e.metric_id.is_some()));

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(TriageEvent::TriageStarted { total_failed: 11, .. })));
    assert!(matches!(
        events.last(),
        Some(TriageEvent::TriageCompleted { cancelled: false, .. })
    ));
    let judged = events
        .iter()
        .filter(|e| matches!(e, TriageEvent::CaseJudged { .. }))
        .count();
    assert_eq!(judged, 9);
    let alerts: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            TriageEvent::BudgetAlert { alert } => Some(alert.threshold),
            _ => None,
        })
        .collect();
    assert_eq!(alerts, vec![50.0, 80.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn billed_calls_without_a_verdict_are_still_charged() {
    let judge = Arc::new(ScriptedJudge::new(|req, _| {
        if req.case_id == "ambiguous-002" {
            Err(JudgeError::InvalidVerdict {
                message: "unparsable verdict: expected value".into(),
                usage: verdict(0.00027).usage,
            })
        } else {
            Ok(verdict(0.001))
        }
    }));
    let accountant = Arc::new(CostAccountant::new());
    let triage = FailureTriage::new(config(precise()), judge.clone(), accountant.clone()).unwrap();

    let mut eval = evaluation(0, 0, 4);
    let summary = triage.run(&mut eval).await.unwrap();

    assert_eq!(summary.llm_judge_analyzed, 3);
    assert_eq!(summary.not_analyzed, 1);
    assert_eq!(judge.calls(), 4);
    assert_eq!(accountant.entries().len(), 4);
    assert!((summary.diagnosis_cost - 0.00327).abs() < 1e-9);

    let failed = eval
        .failed_cases
        .iter()
        .find(|c| c.id == "ambiguous-002")
        .unwrap();
    assert_eq!(failed.diagnosis_method, DiagnosisMethod::NotAnalyzed);
    assert!(failed.judge_error.as_deref().unwrap().contains("unparsable"));
}

#[tokio::test(flavor = "multi_thread")]
async fn annotations_from_an_earlier_pass_are_replaced() {
    let mut eval = evaluation(1, 0, 4);
    for case in &mut eval.failed_cases {
        case.diagnosis_method = DiagnosisMethod::LlmJudge;
        case.root_cause = Some(RootCause::Both);
        case.llm_judge_analysis = Some(RootCauseAnalysis {
            failure_type: FailureType::Both,
            ..verdict(0.0).analysis
        });
        case.judge_error = Some("stale".into());
    }
    let cfg = config(SamplingConfig::MaxCases { max_cases: 2 });
    let summary = run(cfg, Arc::new(ScriptedJudge::ok()), &mut eval).await;

    assert_eq!(summary.heuristic_classified, 1);
    assert_eq!(summary.llm_judge_analyzed, 2);
    assert_eq!(summary.not_analyzed, 2);
    for case in &eval.failed_cases {
        assert!(case.judge_error.is_none(), "{} kept a stale error", case.id);
        match case.diagnosis_method {
            DiagnosisMethod::Heuristic => {
                assert_eq!(case.root_cause, None);
                assert!(case.llm_judge_analysis.is_none());
            }
            DiagnosisMethod::LlmJudge => {
                assert_eq!(case.root_cause, Some(RootCause::Generation));
            }
            DiagnosisMethod::NotAnalyzed => {
                assert_eq!(case.root_cause, None);
                assert!(case.llm_judge_analysis.is_none());
            }
        }
    }
}
