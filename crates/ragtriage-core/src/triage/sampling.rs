//! Stage 2: choose which ambiguous cases are worth a judge call.
//!
//! Selection is stratified by failing metric so a single dominant metric
//! cannot crowd out the rest, and seeded so identical input always yields
//! the same sample regardless of input order.

use crate::config::SamplingConfig;
use crate::error::{Result, TriageError};
use crate::types::FailedCase;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, VecDeque};

pub fn validate(config: &SamplingConfig) -> Result<()> {
    match *config {
        SamplingConfig::Auto { .. } => Ok(()),
        SamplingConfig::FixedRatio { ratio } => {
            if ratio.is_finite() && (0.0..=100.0).contains(&ratio) {
                Ok(())
            } else {
                Err(TriageError::invalid_sampling(format!(
                    "ratio must be within [0, 100], got {ratio}"
                )))
            }
        }
        SamplingConfig::MaxCases { max_cases } => {
            if max_cases == 0 {
                Err(TriageError::invalid_sampling("max_cases must be at least 1"))
            } else {
                Ok(())
            }
        }
    }
}

/// Number of cases to judge out of `ambiguous` candidates.
pub fn sample_count(config: &SamplingConfig, ambiguous: usize) -> Result<usize> {
    validate(config)?;
    if ambiguous == 0 {
        return Ok(0);
    }
    let count = match *config {
        SamplingConfig::Auto { preset } => ratio_count(preset.ratio(), ambiguous),
        SamplingConfig::FixedRatio { ratio } => ratio_count(ratio, ambiguous),
        SamplingConfig::MaxCases { max_cases } => max_cases.min(ambiguous),
    };
    Ok(count)
}

fn ratio_count(ratio: f64, n: usize) -> usize {
    // 20% of 109 is 21.8 -> 22; the epsilon keeps 20% of 5 at exactly 1.
    let raw = (ratio / 100.0 * n as f64 - 1e-9).ceil();
    (raw.max(1.0) as usize).min(n)
}

/// Pick `count` cases, returning positions into `cases` in dispatch order.
pub fn stratified_sample(cases: &[&FailedCase], count: usize, seed: u64) -> Vec<usize> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (pos, case) in cases.iter().enumerate() {
        groups.entry(case.failing_metric.as_str()).or_default().push(pos);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut queues: Vec<VecDeque<usize>> = groups
        .into_values()
        .map(|mut group| {
            group.sort_by(|a, b| cases[*a].id.cmp(&cases[*b].id));
            group.shuffle(&mut rng);
            VecDeque::from(group)
        })
        .collect();

    let count = count.min(cases.len());
    let mut selected = Vec::with_capacity(count);
    while selected.len() < count {
        for queue in queues.iter_mut() {
            if selected.len() == count {
                break;
            }
            if let Some(pos) = queue.pop_front() {
                selected.push(pos);
            }
        }
        queues.retain(|q| !q.is_empty());
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplingPreset;
    use crate::types::DiagnosisMethod;
    use std::collections::{HashMap, HashSet};

    fn case(id: &str, metric: &str) -> FailedCase {
        FailedCase {
            id: id.into(),
            question: String::new(),
            expected_answer: String::new(),
            generated_answer: String::new(),
            score: 0.5,
            failing_metric: metric.into(),
            metric_scores: HashMap::new(),
            retrieved_contexts: vec![],
            root_cause: None,
            diagnosis_method: DiagnosisMethod::NotAnalyzed,
            heuristic_label: None,
            llm_judge_analysis: None,
            judge_error: None,
            judge_attempts: 0,
        }
    }

    #[test]
    fn preset_counts() {
        let balanced = SamplingConfig::Auto {
            preset: SamplingPreset::Balanced,
        };
        assert_eq!(sample_count(&balanced, 109).unwrap(), 22);
        assert_eq!(sample_count(&balanced, 5).unwrap(), 1);
        assert_eq!(sample_count(&balanced, 0).unwrap(), 0);

        let fast = SamplingConfig::Auto {
            preset: SamplingPreset::Fast,
        };
        assert_eq!(sample_count(&fast, 3).unwrap(), 1);

        let precise = SamplingConfig::Auto {
            preset: SamplingPreset::Precise,
        };
        assert_eq!(sample_count(&precise, 37).unwrap(), 37);
    }

    #[test]
    fn zero_ratio_still_samples_one() {
        let cfg = SamplingConfig::FixedRatio { ratio: 0.0 };
        assert_eq!(sample_count(&cfg, 10).unwrap(), 1);
    }

    #[test]
    fn max_cases_caps_at_available() {
        let cfg = SamplingConfig::MaxCases { max_cases: 50 };
        assert_eq!(sample_count(&cfg, 7).unwrap(), 7);
        let cfg = SamplingConfig::MaxCases { max_cases: 3 };
        assert_eq!(sample_count(&cfg, 7).unwrap(), 3);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        for cfg in [
            SamplingConfig::FixedRatio { ratio: 120.0 },
            SamplingConfig::FixedRatio { ratio: -1.0 },
            SamplingConfig::FixedRatio { ratio: f64::NAN },
            SamplingConfig::MaxCases { max_cases: 0 },
        ] {
            assert!(matches!(
                validate(&cfg),
                Err(TriageError::InvalidSamplingConfig(_))
            ));
        }
    }

    #[test]
    fn selection_ignores_input_order() {
        let owned: Vec<FailedCase> = (0..30)
            .map(|i| case(&format!("case-{i:02}"), if i % 3 == 0 { "faithfulness" } else { "answer_relevancy" }))
            .collect();
        let forward: Vec<&FailedCase> = owned.iter().collect();
        let reversed: Vec<&FailedCase> = owned.iter().rev().collect();

        let ids = |cases: &[&FailedCase], picks: Vec<usize>| -> Vec<String> {
            picks.into_iter().map(|p| cases[p].id.clone()).collect()
        };
        let a = ids(&forward, stratified_sample(&forward, 8, 42));
        let b = ids(&reversed, stratified_sample(&reversed, 8, 42));
        assert_eq!(a, b);
        assert_eq!(a.iter().collect::<HashSet<_>>().len(), 8);
    }

    #[test]
    fn every_stratum_is_represented() {
        let mut owned: Vec<FailedCase> = (0..20).map(|i| case(&format!("f{i:02}"), "faithfulness")).collect();
        owned.push(case("r0", "context_recall"));
        owned.push(case("p0", "context_precision"));
        let refs: Vec<&FailedCase> = owned.iter().collect();

        let picked: HashSet<&str> = stratified_sample(&refs, 3, 7)
            .into_iter()
            .map(|p| refs[p].failing_metric.as_str())
            .collect();
        assert_eq!(picked.len(), 3);
    }

    #[test]
    fn different_seeds_can_differ() {
        let owned: Vec<FailedCase> = (0..50).map(|i| case(&format!("c{i:02}"), "faithfulness")).collect();
        let refs: Vec<&FailedCase> = owned.iter().collect();
        let a = stratified_sample(&refs, 5, 1);
        let b = stratified_sample(&refs, 5, 2);
        assert_ne!(a, b);
    }
}
