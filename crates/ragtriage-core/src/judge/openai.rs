use super::{Judge, JudgeError, JudgeRequest, JudgeUsage, JudgeVerdict};
use crate::config::JudgeConfig;
use crate::pricing::calculate_cost;
use crate::types::{FailureType, RootCauseAnalysis};
use async_trait::async_trait;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const MAX_CONTEXT_CHARS: usize = 2_000;

/// Root-cause judge backed by an OpenAI-compatible chat completions API.
pub struct OpenAiJudge {
    model: String,
    prompt_version: String,
    base_url: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    failure_type: FailureType,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    advice: String,
    #[serde(default)]
    confidence: Option<f64>,
}

impl OpenAiJudge {
    pub fn new(model: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .or_else(|| env::var("JUDGE_BASE_URL").ok())
            .or_else(|| env::var("OPENAI_BASE_URL").ok());
        Self {
            model: model.into(),
            prompt_version: "root-cause-v1".into(),
            base_url,
            api_key: env::var("OPENAI_API_KEY")
                .ok()
                .or_else(|| env::var("JUDGE_API_KEY").ok()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &JudgeConfig) -> Self {
        let mut judge = Self::new(cfg.model.clone(), cfg.base_url.clone());
        if cfg.api_key.is_some() {
            judge.api_key = cfg.api_key.clone();
        }
        judge.prompt_version = cfg.prompt_version.clone();
        judge.client = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(cfg.timeout_seconds.max(1.0)))
            .build()
            .unwrap_or_default();
        judge
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token counts and price from the `usage` block of a completion.
    fn usage_from(&self, json: &serde_json::Value) -> JudgeUsage {
        let usage = json.get("usage").cloned().unwrap_or_default();
        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let cached_tokens = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        JudgeUsage {
            provider: "openai".into(),
            model: self.model.clone(),
            input_tokens,
            output_tokens,
            cost_usd: calculate_cost(&self.model, input_tokens, output_tokens, cached_tokens),
        }
    }

    fn prompt(&self, request: &JudgeRequest) -> String {
        let contexts = if request.retrieved_contexts.is_empty() {
            "(none)".to_string()
        } else {
            request
                .retrieved_contexts
                .iter()
                .enumerate()
                .map(|(i, c)| format!("[{}] {}", i + 1, truncate(c, MAX_CONTEXT_CHARS)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "You are diagnosing why a retrieval-augmented generation pipeline failed on a test case.\n\n\
             Failing metric: {}\n\nQuestion: {}\n\nExpected Answer: {}\n\nGenerated Answer: {}\n\n\
             Retrieved Contexts:\n{}\n\n\
             Decide whether the failure was caused by retrieval (the needed information was not retrieved), \
             generation (the information was retrieved but the answer misused it), or both.\n\
             Respond with ONLY a JSON object with the keys \
             \"failure_type\" (\"retrieval\" | \"generation\" | \"both\"), \"reason\", \"summary\", \
             \"advice\" and \"confidence\" (a number between 0 and 1).",
            request.failing_metric,
            request.question,
            request.expected_answer,
            request.generated_answer,
            contexts
        )
    }
}

#[async_trait]
impl Judge for OpenAiJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| JudgeError::Permanent("Missing OPENAI_API_KEY".into()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": self.prompt(request)}
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"}
        });

        let url = format!(
            "{}/v1/chat/completions",
            self.base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| JudgeError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = format!("judge returned {status}: {}", truncate(&text, 200));
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                JudgeError::Transient(msg)
            } else {
                JudgeError::Permanent(msg)
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| JudgeError::Permanent(format!("invalid response body: {e}")))?;
        let usage = self.usage_from(&json);
        debug!(
            case_id = %request.case_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = usage.cost_usd,
            "judge call"
        );

        let invalid = |message: String| JudgeError::InvalidVerdict {
            message,
            usage: Some(usage.clone()),
        };
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| invalid("response has no message content".into()))?;

        let reply: JudgeReply = serde_json::from_str(strip_code_fence(content))
            .map_err(|e| invalid(format!("unparsable verdict: {e}")))?;

        Ok(JudgeVerdict {
            analysis: RootCauseAnalysis {
                failure_type: reply.failure_type,
                reason: reply.reason,
                summary: reply.summary,
                advice: reply.advice,
                confidence: reply.confidence.map(|c| c.clamp(0.0, 1.0)),
                model: Some(self.model.clone()),
                prompt_version: Some(self.prompt_version.clone()),
            },
            usage: Some(usage),
        })
    }

    fn kind(&self) -> &str {
        "openai"
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Models sometimes wrap JSON in a markdown fence despite instructions.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
