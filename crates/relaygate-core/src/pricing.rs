use std::collections::HashMap;

use relaygate_protocol::Usage;

/// `price_table(provider, model) · usage` from spec §4.E's accounting step.
/// A real deployment's price table is loaded from configuration/storage;
/// this crate only needs the seam.
pub trait PriceTable: Send + Sync {
    fn cost(&self, provider: &str, model: &str, usage: &Usage) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Rate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// An in-memory `(provider, model) -> Rate` table with a fallback rate for
/// unknown pairs, so accounting never panics on a model the operator hasn't
/// priced yet — it just under/over-charges at the fallback rate, which is
/// visible in the accrued `current_usage` for the operator to notice.
pub struct StaticPriceTable {
    rates: HashMap<(String, String), Rate>,
    fallback: Rate,
}

impl Default for StaticPriceTable {
    fn default() -> Self {
        Self {
            rates: HashMap::new(),
            fallback: Rate { prompt_per_1k: 0.0, completion_per_1k: 0.0 },
        }
    }
}

impl StaticPriceTable {
    pub fn with_fallback(fallback: Rate) -> Self {
        Self { rates: HashMap::new(), fallback }
    }

    pub fn insert(&mut self, provider: impl Into<String>, model: impl Into<String>, rate: Rate) {
        self.rates.insert((provider.into(), model.into()), rate);
    }
}

impl PriceTable for StaticPriceTable {
    fn cost(&self, provider: &str, model: &str, usage: &Usage) -> f64 {
        let rate = self
            .rates
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or(self.fallback);
        (usage.prompt_tokens as f64 / 1000.0) * rate.prompt_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * rate.completion_per_1k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_cost_from_rate() {
        let mut table = StaticPriceTable::default();
        table.insert("openai", "gpt-4o", Rate { prompt_per_1k: 0.005, completion_per_1k: 0.015 });
        let usage = Usage { prompt_tokens: 1000, completion_tokens: 2000, total_tokens: 3000 };
        assert!((table.cost("openai", "gpt-4o", &usage) - 0.035).abs() < 1e-9);
    }

    #[test]
    fn unknown_pair_uses_fallback() {
        let table = StaticPriceTable::default();
        let usage = Usage { prompt_tokens: 1000, completion_tokens: 0, total_tokens: 1000 };
        assert_eq!(table.cost("unknown", "model", &usage), 0.0);
    }
}
