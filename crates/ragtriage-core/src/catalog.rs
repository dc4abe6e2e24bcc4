//! Static registry of the metrics a RAG evaluation can report.

use crate::config::ConfigError;
use crate::types::{Metric, MetricTier, PipelineStage};
use std::collections::HashMap;

/// Metric ids the default catalog knows about.
pub mod ids {
    pub const FAITHFULNESS: &str = "faithfulness";
    pub const ANSWER_CORRECTNESS: &str = "answer_correctness";
    pub const ANSWER_RELEVANCY: &str = "answer_relevancy";
    pub const CONTEXT_PRECISION: &str = "context_precision";
    pub const CONTEXT_RECALL: &str = "context_recall";
    pub const CONTEXT_ENTITY_RECALL: &str = "context_entity_recall";
    pub const ANSWER_SIMILARITY: &str = "answer_similarity";
    pub const NOISE_SENSITIVITY: &str = "noise_sensitivity";
    pub const CONTEXT_RELEVANCY: &str = "context_relevancy";
    pub const COHERENCE: &str = "coherence";
    pub const CONCISENESS: &str = "conciseness";
    pub const FLUENCY: &str = "fluency";
}

#[derive(Debug, Clone)]
pub struct MetricCatalog {
    metrics: Vec<Metric>,
    index: HashMap<String, usize>,
}

impl MetricCatalog {
    /// Build a catalog from an explicit metric list.
    pub fn from_metrics(metrics: Vec<Metric>) -> Result<Self, ConfigError> {
        if metrics.is_empty() {
            return Err(ConfigError::Invalid("metric catalog is empty".into()));
        }
        let mut metrics = metrics;
        metrics.sort_by(|a, b| a.id.cmp(&b.id));

        let mut index = HashMap::with_capacity(metrics.len());
        for (i, metric) in metrics.iter().enumerate() {
            if metric.id.trim().is_empty() {
                return Err(ConfigError::Invalid("metric id must not be empty".into()));
            }
            if !(metric.weight.is_finite() && metric.weight > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "metric {} has non-positive weight {}",
                    metric.id, metric.weight
                )));
            }
            if index.insert(metric.id.clone(), i).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "metric {} is listed twice",
                    metric.id
                )));
            }
        }
        Ok(Self { metrics, index })
    }

    pub fn get(&self, id: &str) -> Option<&Metric> {
        self.index.get(id).map(|&i| &self.metrics[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metrics in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    pub fn by_tier(&self, tier: MetricTier) -> impl Iterator<Item = &Metric> {
        self.metrics.iter().filter(move |m| m.tier == tier)
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        use ids::*;
        use MetricTier::*;
        use PipelineStage::*;

        let metrics = vec![
            Metric::new(FAITHFULNESS, Critical, Generation, true),
            Metric::new(ANSWER_CORRECTNESS, Critical, Generation, true),
            Metric::new(ANSWER_RELEVANCY, Important, Generation, true),
            Metric::new(CONTEXT_PRECISION, Important, Retrieval, true),
            Metric::new(CONTEXT_RECALL, Important, Retrieval, true),
            Metric::new(CONTEXT_ENTITY_RECALL, Supplementary, Retrieval, true),
            Metric::new(ANSWER_SIMILARITY, Supplementary, Generation, false),
            Metric::new(NOISE_SENSITIVITY, Supplementary, Generation, true),
            Metric::new(CONTEXT_RELEVANCY, Auxiliary, Retrieval, true),
            Metric::new(COHERENCE, Auxiliary, Generation, true),
            Metric::new(CONCISENESS, Auxiliary, Generation, true),
            Metric::new(FLUENCY, Auxiliary, Generation, true),
        ];
        // The built-in list is well formed; an empty fallback keeps this infallible.
        Self::from_metrics(metrics).unwrap_or_else(|_| Self {
            metrics: Vec::new(),
            index: HashMap::new(),
        })
    }
}
