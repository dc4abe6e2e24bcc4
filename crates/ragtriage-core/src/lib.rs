//! Core library for ragtriage: RAG evaluation scoring and failure triage.
//!
//! - [`catalog`]: the metric catalog (tiers, weights, pipeline stages)
//! - [`scoring`]: weighted overall score and its reliability
//! - [`grade`]: grade classification with critical-metric warnings
//! - [`trend`]: comparison against the previous evaluation
//! - [`triage`]: heuristics, sampling and judge analysis of failed cases
//! - [`judge`]: the judge contract plus an OpenAI-compatible adapter
//! - [`cost`]: cost ledger, budgets and alerts
//! - [`config`]: configuration loading and validation
//! - [`events`]: triage progress events
//! - [`error`]: unified error types
//!
//! # Architecture
//!
//! Scoring, grading and trend comparison are pure functions over an
//! [`types::EvaluationResult`]. Triage is the only stateful component: it
//! owns the outstanding judge calls of a run, charges their cost to a shared
//! [`cost::CostAccountant`], and reports progress over a broadcast channel.

// Foundation modules (no internal dependencies)
pub mod pricing;
pub mod retry;
pub mod types;

// Error and configuration
pub mod config;
pub mod error;

// Pure evaluation logic
pub mod catalog;
pub mod grade;
pub mod report;
pub mod scoring;
pub mod trend;

// Triage and accounting
pub mod cost;
pub mod events;
pub mod judge;
pub mod triage;

pub use catalog::MetricCatalog;
pub use config::{
    load_config, load_config_with_overrides, load_default_config, Config, ConfigOverrides,
};
pub use cost::{Budget, CostAccountant, CostAlert, CostEntry, CostSummary};
pub use error::{Result, TriageError};
pub use events::TriageEvent;
pub use judge::{Judge, JudgeError, JudgeRequest, JudgeVerdict, OpenAiJudge};
pub use report::{score_report, ScoreReport};
pub use triage::FailureTriage;
pub use types::{DiagnosisSummary, EvaluationResult, FailedCase};
