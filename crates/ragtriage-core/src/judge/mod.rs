//! The judge contract used by triage stage 3.
//!
//! A judge receives one failed case and explains why it failed. The
//! orchestrator owns retries, cancellation and cost bookkeeping; a judge only
//! performs a single attempt and classifies its errors.

use crate::types::RootCauseAnalysis;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod openai;
pub use openai::OpenAiJudge;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeRequest {
    pub case_id: String,
    pub question: String,
    pub generated_answer: String,
    pub expected_answer: String,
    pub retrieved_contexts: Vec<String>,
    pub failing_metric: String,
}

/// Token usage and price of one judge call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JudgeUsage {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    pub analysis: RootCauseAnalysis,
    #[serde(default)]
    pub usage: Option<JudgeUsage>,
}

impl JudgeVerdict {
    pub fn cost_usd(&self) -> f64 {
        self.usage.as_ref().map_or(0.0, |u| u.cost_usd)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JudgeError {
    /// Rate limits, timeouts, 5xx: worth another attempt.
    #[error("transient judge error: {0}")]
    Transient(String),
    /// Bad request, auth, missing key: retrying will not help.
    #[error("permanent judge error: {0}")]
    Permanent(String),
    /// The call succeeded and was billed, but its reply is not a verdict.
    #[error("invalid judge verdict: {message}")]
    InvalidVerdict {
        message: String,
        usage: Option<JudgeUsage>,
    },
}

impl JudgeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JudgeError::Transient(_))
    }

    /// Spend incurred by the failed attempt, if the provider billed it.
    pub fn usage(&self) -> Option<&JudgeUsage> {
        match self {
            JudgeError::InvalidVerdict { usage, .. } => usage.as_ref(),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError>;
    fn kind(&self) -> &str;
}
