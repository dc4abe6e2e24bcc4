//! Unified error types for ragtriage.

use crate::config::ConfigError;
use crate::judge::JudgeError;
use thiserror::Error;

/// Errors surfaced by the scoring, triage and cost components.
///
/// Structural errors (`InsufficientData`, `InvalidSamplingConfig`) indicate
/// misuse and abort the call. Judge failures never show up here: the triage
/// orchestrator recovers them per case (see [`crate::judge::JudgeError`]).
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("insufficient data: no known metric was evaluated")]
    InsufficientData,

    #[error("invalid sampling config: {0}")]
    InvalidSamplingConfig(String),

    /// Recovered per case inside triage; only direct judge callers see it.
    #[error(transparent)]
    JudgeCall(#[from] JudgeError),

    #[error("budget {budget_id} exceeded its hard limit ({percentage_used:.1}% used)")]
    BudgetExceeded {
        budget_id: String,
        percentage_used: f64,
    },

    #[error("evaluation {0} already has a diagnosis summary")]
    AlreadyDiagnosed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl TriageError {
    pub fn invalid_sampling(msg: impl Into<String>) -> Self {
        Self::InvalidSamplingConfig(msg.into())
    }

    /// Whether the error is an advisory budget signal rather than a failure.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
