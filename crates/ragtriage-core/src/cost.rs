//! Cost ledger, budgets and budget alerts.
//!
//! Every paid call (judge calls during triage, LLM calls made by the upstream
//! evaluation run) is appended to the ledger. Amounts are accumulated as
//! integer nano-dollars so totals do not depend on the order concurrent
//! workers append in.

use crate::config::BudgetConfig;
use crate::error::{Result, TriageError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

const NANODOLLARS_PER_USD: f64 = 1_000_000_000.0;

/// Key used for ledger entries that carry no metric id.
pub const UNATTRIBUTED_METRIC: &str = "unattributed";

fn to_nanos(usd: f64) -> u64 {
    if !usd.is_finite() || usd < 0.0 {
        warn!(amount = usd, "Ignoring invalid cost amount");
        return 0;
    }
    (usd * NANODOLLARS_PER_USD).round() as u64
}

fn to_usd(nanos: u64) -> f64 {
    nanos as f64 / NANODOLLARS_PER_USD
}

// ============================================================================
// LEDGER ENTRIES
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostPurpose {
    #[default]
    Evaluation,
    Diagnosis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub metric_id: Option<String>,
    /// USD.
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub purpose: CostPurpose,
    #[serde(default)]
    pub evaluation_id: Option<String>,
}

impl CostEntry {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, amount: f64) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            metric_id: None,
            amount,
            timestamp: Utc::now(),
            purpose: CostPurpose::Evaluation,
            evaluation_id: None,
        }
    }

    pub fn with_metric(mut self, metric_id: impl Into<String>) -> Self {
        self.metric_id = Some(metric_id.into());
        self
    }

    pub fn for_evaluation(mut self, evaluation_id: impl Into<String>) -> Self {
        self.evaluation_id = Some(evaluation_id.into());
        self
    }

    pub fn for_diagnosis(mut self, evaluation_id: impl Into<String>) -> Self {
        self.purpose = CostPurpose::Diagnosis;
        self.evaluation_id = Some(evaluation_id.into());
        self
    }
}

// ============================================================================
// BUDGETS & ALERTS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Weekly,
    #[default]
    Monthly,
    Total,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    pub limit: f64,
    #[serde(default)]
    pub current_usage: f64,
    #[serde(default)]
    pub period: BudgetPeriod,
    /// Percentages, kept sorted ascending.
    #[serde(default)]
    pub alert_thresholds: Vec<f64>,
    #[serde(default)]
    pub is_hard_limit: bool,
    #[serde(default)]
    pub provider: Option<String>,
}

impl Budget {
    pub fn new(id: impl Into<String>, limit: f64) -> Self {
        Self {
            id: id.into(),
            limit,
            current_usage: 0.0,
            period: BudgetPeriod::default(),
            alert_thresholds: Vec::new(),
            is_hard_limit: false,
            provider: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: &[f64]) -> Self {
        self.alert_thresholds = thresholds.to_vec();
        self.alert_thresholds.sort_by(|a, b| a.total_cmp(b));
        self.alert_thresholds.dedup();
        self
    }

    pub fn hard_limit(mut self) -> Self {
        self.is_hard_limit = true;
        self
    }

    pub fn percentage_used(&self) -> f64 {
        if self.limit <= 0.0 {
            return if self.current_usage > 0.0 { 100.0 } else { 0.0 };
        }
        self.current_usage / self.limit * 100.0
    }

    pub fn is_blocking(&self) -> bool {
        self.is_hard_limit && self.percentage_used() >= 100.0
    }

    fn counts(&self, entry: &CostEntry) -> bool {
        self.provider
            .as_deref()
            .map_or(true, |p| p.eq_ignore_ascii_case(&entry.provider))
    }
}

impl From<&BudgetConfig> for Budget {
    fn from(cfg: &BudgetConfig) -> Self {
        let mut budget = Budget::new(cfg.id.clone(), cfg.limit).with_thresholds(&cfg.alert_thresholds);
        budget.current_usage = cfg.current_usage;
        budget.period = cfg.period;
        budget.is_hard_limit = cfg.is_hard_limit;
        budget.provider = cfg.provider.clone();
        budget
    }
}

/// Budget plus the values derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    #[serde(flatten)]
    pub budget: Budget,
    pub percentage_used: f64,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    /// info below 80 %, warning from 80 % up to 95 %, critical from 95 %.
    pub fn for_threshold(threshold: f64) -> Self {
        if threshold >= 95.0 {
            AlertSeverity::Critical
        } else if threshold >= 80.0 {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostAlert {
    pub budget_id: String,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub message: String,
    pub is_acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one budget evaluation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetEvaluation {
    /// Alerts fired by this pass only.
    pub new_alerts: Vec<CostAlert>,
    /// Hard-limit budgets at or above 100 %.
    pub blocked_budgets: Vec<String>,
}

impl BudgetEvaluation {
    pub fn blocks_new_runs(&self) -> bool {
        !self.blocked_budgets.is_empty()
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostShare {
    pub key: String,
    pub cost: f64,
    pub percentage_of_total: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub total_cost: f64,
    pub entry_count: usize,
    pub by_provider_model: Vec<CostShare>,
    pub by_metric: Vec<CostShare>,
}

fn shares(grouped: BTreeMap<String, u64>, total_nanos: u64) -> Vec<CostShare> {
    let mut items: Vec<(String, u64)> = grouped.into_iter().collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items
        .into_iter()
        .map(|(key, nanos)| CostShare {
            key,
            cost: to_usd(nanos),
            percentage_of_total: if total_nanos == 0 {
                0.0
            } else {
                nanos as f64 / total_nanos as f64 * 100.0
            },
        })
        .collect()
}

// ============================================================================
// ACCOUNTANT
// ============================================================================

struct BudgetState {
    budget: Budget,
    usage_nanos: u64,
}

impl BudgetState {
    fn snapshot(&self) -> Budget {
        let mut budget = self.budget.clone();
        budget.current_usage = to_usd(self.usage_nanos);
        budget
    }
}

#[derive(Default)]
struct Ledger {
    entries: Vec<(CostEntry, u64)>,
    total_nanos: u64,
    budgets: Vec<BudgetState>,
    alerts: Vec<CostAlert>,
    fired: HashSet<(String, u64)>,
}

/// Append-only cost ledger with budget tracking.
///
/// Shared between triage workers behind an `Arc`; every method takes `&self`.
#[derive(Default)]
pub struct CostAccountant {
    inner: Mutex<Ledger>,
}

impl CostAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budgets(budgets: impl IntoIterator<Item = Budget>) -> Self {
        let accountant = Self::new();
        for budget in budgets {
            accountant.add_budget(budget);
        }
        accountant
    }

    /// Register a budget, replacing any budget with the same id.
    pub fn add_budget(&self, budget: Budget) {
        let thresholds = budget.alert_thresholds.clone();
        let mut budget = budget.with_thresholds(&thresholds);
        let usage_nanos = to_nanos(budget.current_usage);
        budget.current_usage = 0.0;

        let mut ledger = self.inner.lock();
        ledger.budgets.retain(|b| b.budget.id != budget.id);
        ledger.fired.retain(|(id, _)| id != &budget.id);
        ledger.budgets.push(BudgetState {
            budget,
            usage_nanos,
        });
    }

    /// Append a paid call to the ledger and charge matching budgets.
    pub fn record(&self, entry: CostEntry) {
        let nanos = to_nanos(entry.amount);
        let mut ledger = self.inner.lock();
        for state in ledger.budgets.iter_mut() {
            if state.budget.counts(&entry) {
                state.usage_nanos = state.usage_nanos.saturating_add(nanos);
            }
        }
        ledger.total_nanos = ledger.total_nanos.saturating_add(nanos);
        ledger.entries.push((entry, nanos));
    }

    pub fn entries(&self) -> Vec<CostEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(e, _)| e.clone())
            .collect()
    }

    pub fn total_cost(&self) -> f64 {
        to_usd(self.inner.lock().total_nanos)
    }

    /// Sum of diagnosis spend attributed to one evaluation.
    pub fn diagnosis_cost(&self, evaluation_id: &str) -> f64 {
        let ledger = self.inner.lock();
        let nanos: u64 = ledger
            .entries
            .iter()
            .filter(|(e, _)| {
                e.purpose == CostPurpose::Diagnosis
                    && e.evaluation_id.as_deref() == Some(evaluation_id)
            })
            .map(|(_, m)| *m)
            .sum();
        to_usd(nanos)
    }

    pub fn summary(&self) -> CostSummary {
        let ledger = self.inner.lock();
        let mut by_provider_model: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_metric: BTreeMap<String, u64> = BTreeMap::new();
        for (entry, nanos) in &ledger.entries {
            *by_provider_model
                .entry(format!("{}/{}", entry.provider, entry.model))
                .or_default() += nanos;
            *by_metric
                .entry(
                    entry
                        .metric_id
                        .clone()
                        .unwrap_or_else(|| UNATTRIBUTED_METRIC.to_string()),
                )
                .or_default() += nanos;
        }
        CostSummary {
            total_cost: to_usd(ledger.total_nanos),
            entry_count: ledger.entries.len(),
            by_provider_model: shares(by_provider_model, ledger.total_nanos),
            by_metric: shares(by_metric, ledger.total_nanos),
        }
    }

    pub fn budgets(&self) -> Vec<BudgetStatus> {
        self.inner
            .lock()
            .budgets
            .iter()
            .map(|state| {
                let budget = state.snapshot();
                BudgetStatus {
                    percentage_used: budget.percentage_used(),
                    blocked: budget.is_blocking(),
                    budget,
                }
            })
            .collect()
    }

    /// Fire one alert per newly crossed threshold and report blocked budgets.
    pub fn evaluate_budgets(&self) -> BudgetEvaluation {
        let mut ledger = self.inner.lock();
        let Ledger {
            budgets,
            alerts,
            fired,
            ..
        } = &mut *ledger;

        let mut evaluation = BudgetEvaluation::default();
        for state in budgets.iter() {
            let budget = state.snapshot();
            let pct = budget.percentage_used();
            for &threshold in &budget.alert_thresholds {
                if pct < threshold {
                    break;
                }
                if !fired.insert((budget.id.clone(), threshold.to_bits())) {
                    continue;
                }
                let severity = AlertSeverity::for_threshold(threshold);
                let alert = CostAlert {
                    budget_id: budget.id.clone(),
                    threshold,
                    severity,
                    message: format!(
                        "Budget {} crossed {threshold}% ({pct:.1}% of {:.2} USD used)",
                        budget.id, budget.limit
                    ),
                    is_acknowledged: false,
                    created_at: Utc::now(),
                };
                info!(budget = %budget.id, threshold, ?severity, "Budget alert fired");
                alerts.push(alert.clone());
                evaluation.new_alerts.push(alert);
            }
            if budget.is_blocking() {
                warn!(budget = %budget.id, pct, "Hard budget limit reached");
                evaluation.blocked_budgets.push(budget.id.clone());
            }
        }
        evaluation
    }

    /// Advisory gate for starting a new evaluation run.
    pub fn ensure_can_start(&self) -> Result<()> {
        let ledger = self.inner.lock();
        for state in &ledger.budgets {
            let budget = state.snapshot();
            if budget.is_blocking() {
                return Err(TriageError::BudgetExceeded {
                    budget_id: budget.id.clone(),
                    percentage_used: budget.percentage_used(),
                });
            }
        }
        Ok(())
    }

    pub fn alerts(&self) -> Vec<CostAlert> {
        self.inner.lock().alerts.clone()
    }

    /// Returns false when no matching alert exists.
    pub fn acknowledge_alert(&self, budget_id: &str, threshold: f64) -> bool {
        let mut ledger = self.inner.lock();
        let mut found = false;
        for alert in ledger
            .alerts
            .iter_mut()
            .filter(|a| a.budget_id == budget_id && a.threshold == threshold)
        {
            alert.is_acknowledged = true;
            found = true;
        }
        found
    }

    /// Start a new period: usage back to zero, thresholds may fire again.
    pub fn reset_budget(&self, budget_id: &str) -> bool {
        let mut ledger = self.inner.lock();
        let Some(state) = ledger.budgets.iter_mut().find(|b| b.budget.id == budget_id) else {
            return false;
        };
        state.usage_nanos = 0;
        ledger.fired.retain(|(id, _)| id != budget_id);
        info!(budget = %budget_id, "Budget period reset");
        true
    }
}
