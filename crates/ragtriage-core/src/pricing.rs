//! Per-model token pricing used to cost judge calls.

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
    pub cached_input_per_1m: f64,
}

const fn price(input: f64, output: f64, cached: f64) -> ModelPricing {
    ModelPricing {
        input_per_1m: input,
        output_per_1m: output,
        cached_input_per_1m: cached,
    }
}

static PRICING: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", price(0.15, 0.60, 0.075)),
    ("gpt-4o", price(2.50, 10.00, 1.25)),
    ("gpt-4.1-nano", price(0.10, 0.40, 0.025)),
    ("gpt-4.1-mini", price(0.40, 1.60, 0.10)),
    ("gpt-4.1", price(2.00, 8.00, 0.50)),
    ("o3-mini", price(1.10, 4.40, 0.55)),
    ("claude-3-5-haiku", price(0.80, 4.00, 0.08)),
    ("claude-3-5-sonnet", price(3.00, 15.00, 0.30)),
    ("claude-sonnet-4", price(3.00, 15.00, 0.30)),
];

/// Look up pricing, matching dated variants (`gpt-4o-mini-2024-07-18`)
/// to the longest known prefix.
pub fn get_pricing(model: &str) -> Option<ModelPricing> {
    let lowered = model.trim().to_ascii_lowercase();
    let model = lowered.rsplit('/').next().unwrap_or(&lowered);
    PRICING
        .iter()
        .filter(|(name, _)| model == *name || model.starts_with(&format!("{name}-")))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, p)| *p)
}

/// Cost in USD; unknown models cost nothing.
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> f64 {
    let Some(p) = get_pricing(model) else {
        return 0.0;
    };
    let cached = cached_tokens.min(input_tokens);
    let uncached = input_tokens - cached;
    (uncached as f64 * p.input_per_1m
        + cached as f64 * p.cached_input_per_1m
        + output_tokens as f64 * p.output_per_1m)
        / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_versions_resolve_to_base_model() {
        let p = get_pricing("gpt-4o-mini-2024-07-18").unwrap();
        assert!((p.input_per_1m - 0.15).abs() < 1e-9);
        let p = get_pricing("gpt-4o-2024-08-06").unwrap();
        assert!((p.input_per_1m - 2.50).abs() < 1e-9);
    }

    #[test]
    fn provider_prefix_is_ignored() {
        assert!(get_pricing("openai/gpt-4.1-mini").is_some());
    }

    #[test]
    fn cached_tokens_are_cheaper() {
        let full = calculate_cost("gpt-4o-mini", 1_000_000, 0, 0);
        let cached = calculate_cost("gpt-4o-mini", 1_000_000, 0, 1_000_000);
        assert!((full - 0.15).abs() < 1e-9);
        assert!((cached - 0.075).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_free() {
        assert!(get_pricing("unknown-model").is_none());
        assert_eq!(calculate_cost("unknown-model", 1000, 1000, 0), 0.0);
    }
}
