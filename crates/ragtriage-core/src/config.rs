//! Configuration loading and models for ragtriage.
//!
//! Configuration is loaded via figment from multiple layers:
//! 1. YAML file (base configuration)
//! 2. Environment variables (RAGTRIAGE_ prefix, __ as nested separator)
//! 3. CLI overrides (passed programmatically)

use crate::catalog::MetricCatalog;
use crate::cost::BudgetPeriod;
use crate::grade::DEFAULT_WARNING_FLOOR;
use crate::types::Metric;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Figment(#[from] figment::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// DEFAULTS (all in one place)
// ============================================================================

fn default_warning_floor() -> f64 {
    DEFAULT_WARNING_FLOOR
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_seed() -> u64 {
    42
}

fn default_trivial_score_threshold() -> f64 {
    0.2
}

fn default_retrieval_threshold() -> f64 {
    0.1
}

fn default_context_metric() -> String {
    crate::catalog::ids::CONTEXT_RECALL.to_string()
}

fn default_judge_provider() -> String {
    "openai".to_string()
}

fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_prompt_version() -> String {
    "root-cause-v1".to_string()
}

fn default_judge_timeout_seconds() -> f64 {
    60.0
}

// ============================================================================
// SCORING CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_warning_floor")]
    pub warning_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            warning_floor: default_warning_floor(),
        }
    }
}

// ============================================================================
// SAMPLING CONFIG (typed, not HashMap)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPreset {
    Fast,
    #[default]
    Balanced,
    Precise,
}

impl SamplingPreset {
    /// Percentage of ambiguous cases sent to the judge.
    pub fn ratio(self) -> f64 {
        match self {
            SamplingPreset::Fast => 5.0,
            SamplingPreset::Balanced => 20.0,
            SamplingPreset::Precise => 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingConfig {
    Auto {
        #[serde(default)]
        preset: SamplingPreset,
    },
    FixedRatio {
        ratio: f64,
    },
    MaxCases {
        max_cases: usize,
    },
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig::Auto {
            preset: SamplingPreset::default(),
        }
    }
}

// ============================================================================
// TRIAGE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Maximum judge calls in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_trivial_score_threshold")]
    pub trivial_score_threshold: f64,
    #[serde(default = "default_retrieval_threshold")]
    pub retrieval_threshold: f64,
    #[serde(default = "default_context_metric")]
    pub context_metric: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            seed: default_seed(),
            trivial_score_threshold: default_trivial_score_threshold(),
            retrieval_threshold: default_retrieval_threshold(),
            context_metric: default_context_metric(),
        }
    }
}

// ============================================================================
// JUDGE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_judge_provider")]
    pub provider: String,
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
    #[serde(default = "default_judge_timeout_seconds")]
    pub timeout_seconds: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: default_judge_provider(),
            model: default_judge_model(),
            base_url: None,
            api_key: None,
            prompt_version: default_prompt_version(),
            timeout_seconds: default_judge_timeout_seconds(),
        }
    }
}

// ============================================================================
// BUDGET CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub id: String,
    pub limit: f64,
    /// Spend already incurred in the current period.
    #[serde(default)]
    pub current_usage: f64,
    #[serde(default)]
    pub period: BudgetPeriod,
    #[serde(default)]
    pub alert_thresholds: Vec<f64>,
    #[serde(default)]
    pub is_hard_limit: bool,
    /// Only spend from this provider counts toward the budget.
    #[serde(default)]
    pub provider: Option<String>,
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Replaces the built-in metric catalog when present.
    #[serde(default)]
    pub catalog: Option<Vec<Metric>>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub budgets: Vec<BudgetConfig>,
}

impl Config {
    /// Load from a YAML file, then apply env vars and overrides.
    pub fn from_file(
        path: impl AsRef<Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        load_config_with_overrides(path, overrides)
    }

    pub fn metric_catalog(&self) -> Result<MetricCatalog, ConfigError> {
        match &self.catalog {
            Some(metrics) => MetricCatalog::from_metrics(metrics.clone()),
            None => Ok(MetricCatalog::default()),
        }
    }
}

// ============================================================================
// CLI OVERRIDES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Switches sampling to `fixed_ratio` with this percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    fn is_empty(&self) -> bool {
        self.concurrency.is_none()
            && self.max_retries.is_none()
            && self.sampling_ratio.is_none()
            && self.seed.is_none()
    }
}

// ============================================================================
// LOADING
// ============================================================================

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    load_config_with_overrides(path, ConfigOverrides::default())
}

pub fn load_config_with_overrides(
    path: impl AsRef<Path>,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let interpolated = interpolate_env_vars(&contents);
    extract(Figment::new().merge(Yaml::string(&interpolated)), overrides)
}

/// Built-in defaults plus env vars and overrides, for runs without a file.
pub fn load_default_config(overrides: ConfigOverrides) -> Result<Config, ConfigError> {
    extract(Figment::new(), overrides)
}

fn extract(base: Figment, overrides: ConfigOverrides) -> Result<Config, ConfigError> {
    let mut figment = base.merge(Env::prefixed("RAGTRIAGE_").split("__"));

    if !overrides.is_empty() {
        let mut triage = serde_json::Map::new();
        if let Some(c) = overrides.concurrency {
            triage.insert("concurrency".to_string(), serde_json::json!(c));
        }
        if let Some(r) = overrides.max_retries {
            triage.insert("max_retries".to_string(), serde_json::json!(r));
        }
        if let Some(ratio) = overrides.sampling_ratio {
            triage.insert(
                "sampling".to_string(),
                serde_json::json!({ "mode": "fixed_ratio", "ratio": ratio }),
            );
        }
        if let Some(seed) = overrides.seed {
            triage.insert("seed".to_string(), serde_json::json!(seed));
        }

        #[derive(Serialize)]
        struct TriageOverride {
            triage: serde_json::Map<String, serde_json::Value>,
        }

        figment = figment.merge(Serialized::defaults(TriageOverride { triage }));
    }

    let cfg: Config = figment.extract()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Expand `${VAR}` and `${VAR:-default}` references.
pub fn interpolate_env_vars(input: &str) -> String {
    use once_cell::sync::Lazy;
    use regex::Regex;
    use std::env;

    static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
    });

    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_val = caps.get(2).map(|m| m.as_str());
            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_val.unwrap_or("").to_string(),
            }
        })
        .to_string()
}

fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    cfg.metric_catalog()?;
    unit_interval("scoring.warning_floor", cfg.scoring.warning_floor)?;

    let triage = &cfg.triage;
    if triage.concurrency == 0 {
        return Err(ConfigError::Invalid("triage.concurrency must be at least 1".into()));
    }
    unit_interval("triage.trivial_score_threshold", triage.trivial_score_threshold)?;
    unit_interval("triage.retrieval_threshold", triage.retrieval_threshold)?;
    if triage.context_metric.trim().is_empty() {
        return Err(ConfigError::Invalid("triage.context_metric must not be empty".into()));
    }
    crate::triage::sampling::validate(&triage.sampling)
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    if !(cfg.judge.timeout_seconds.is_finite() && cfg.judge.timeout_seconds > 0.0) {
        return Err(ConfigError::Invalid("judge.timeout_seconds must be positive".into()));
    }

    let mut seen = HashSet::new();
    for budget in &cfg.budgets {
        if budget.id.trim().is_empty() {
            return Err(ConfigError::Invalid("budgets must have a non-empty id".into()));
        }
        if !seen.insert(budget.id.as_str()) {
            return Err(ConfigError::Invalid(format!("budget {} is listed twice", budget.id)));
        }
        if !budget.limit.is_finite() || budget.limit < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "budget {} has an invalid limit {}",
                budget.id, budget.limit
            )));
        }
        if !budget.current_usage.is_finite() || budget.current_usage < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "budget {} has an invalid current_usage {}",
                budget.id, budget.current_usage
            )));
        }
        if budget
            .alert_thresholds
            .iter()
            .any(|t| !t.is_finite() || *t <= 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "budget {} has a non-positive alert threshold",
                budget.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars() {
        std::env::set_var("RAGTRIAGE_TEST_VAR", "hello");
        let output = interpolate_env_vars("value: ${RAGTRIAGE_TEST_VAR}");
        assert_eq!(output, "value: hello");
        std::env::remove_var("RAGTRIAGE_TEST_VAR");
    }

    #[test]
    fn test_interpolate_with_default() {
        std::env::remove_var("RAGTRIAGE_NONEXISTENT_VAR");
        let output = interpolate_env_vars("value: ${RAGTRIAGE_NONEXISTENT_VAR:-default_value}");
        assert_eq!(output, "value: default_value");
    }

    #[test]
    fn preset_ratios() {
        assert_eq!(SamplingPreset::Fast.ratio(), 5.0);
        assert_eq!(SamplingPreset::Balanced.ratio(), 20.0);
        assert_eq!(SamplingPreset::Precise.ratio(), 100.0);
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        validate_config(&cfg).unwrap();
        assert_eq!(cfg.triage.max_retries, 3);
        assert_eq!(cfg.triage.sampling, SamplingConfig::default());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut cfg = Config::default();
        cfg.triage.concurrency = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn overrides_emptiness() {
        assert!(ConfigOverrides::default().is_empty());
        let overrides = ConfigOverrides {
            seed: Some(7),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
    }
}
