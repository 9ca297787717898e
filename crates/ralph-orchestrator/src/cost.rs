//! Cost estimation for backends that don't report their own spend.
//! Supplements the distilled spec, which left the estimator's source of
//! prices unspecified: a small built-in price table, overridable from the
//! control document's `cost_table` section.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use ralph_control::ModelPrice;

const DEFAULT_INPUT_PER_MILLION: u64 = 3_000; // cents, i.e. $30.00 / M tokens
const DEFAULT_OUTPUT_PER_MILLION: u64 = 15_000;

fn builtin_table() -> HashMap<String, ModelPrice> {
    [
        ("claude-opus-4", 1_500, 7_500),
        ("claude-sonnet-4", 300, 1_500),
        ("claude-haiku-4", 80, 400),
        ("gpt-4o", 250, 1_000),
        ("gpt-4-turbo", 1_000, 3_000),
        ("gpt-3.5-turbo", 50, 150),
    ]
    .into_iter()
    .map(|(model, input, output)| {
        (
            model.to_string(),
            ModelPrice {
                input_per_million: input,
                output_per_million: output,
            },
        )
    })
    .collect()
}

/// Estimates spend in cents given token counts, falling back to a default
/// price for models it doesn't recognize and logging the fallback once per
/// unknown model.
pub struct CostEstimator {
    table: HashMap<String, ModelPrice>,
    default_price: ModelPrice,
    warned: Mutex<HashSet<String>>,
}

impl CostEstimator {
    pub fn new(overrides: &HashMap<String, ModelPrice>) -> Self {
        let mut table = builtin_table();
        table.extend(overrides.clone());
        CostEstimator {
            table,
            default_price: ModelPrice {
                input_per_million: DEFAULT_INPUT_PER_MILLION,
                output_per_million: DEFAULT_OUTPUT_PER_MILLION,
            },
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Estimated cost in cents for a single request.
    pub fn estimate(&self, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        let price = match self.table.get(model) {
            Some(price) => price,
            None => {
                let mut warned = self.warned.lock().expect("poisoned");
                if warned.insert(model.to_string()) {
                    tracing::warn!(model, "no cost table entry, using default price");
                }
                &self.default_price
            }
        };
        (tokens_in as f64 * price.input_per_million as f64
            + tokens_out as f64 * price.output_per_million as f64)
            / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_uses_its_price() {
        let estimator = CostEstimator::new(&HashMap::new());
        let cost = estimator.estimate("claude-haiku-4", 1_000_000, 0);
        assert_eq!(cost, 80.0);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let estimator = CostEstimator::new(&HashMap::new());
        let cost = estimator.estimate("mystery-model", 1_000_000, 0);
        assert_eq!(cost, DEFAULT_INPUT_PER_MILLION as f64);
    }

    #[test]
    fn control_document_overrides_builtin_price() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude-haiku-4".to_string(),
            ModelPrice {
                input_per_million: 1,
                output_per_million: 1,
            },
        );
        let estimator = CostEstimator::new(&overrides);
        assert_eq!(estimator.estimate("claude-haiku-4", 1_000_000, 0), 1.0);
    }
}
