//! Per-model token pricing

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

const PER_MILLION: f64 = 1_000_000.0;

/// Token prices for one model family, USD per million tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64, cache_write: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_write,
            cache_read,
        }
    }

    /// Actual cost of one call, each token class at its own rate
    pub fn cost(&self, prompt: u64, completion: u64, cache_write: u64, cache_read: u64) -> f64 {
        (prompt as f64 * self.input
            + completion as f64 * self.output
            + cache_write as f64 * self.cache_write
            + cache_read as f64 * self.cache_read)
            / PER_MILLION
    }

    /// What the call would have cost with every prompt token billed as plain input
    pub fn cost_without_caching(&self, prompt: u64, completion: u64, cache_write: u64, cache_read: u64) -> f64 {
        ((prompt + cache_write + cache_read) as f64 * self.input + completion as f64 * self.output) / PER_MILLION
    }
}

/// Built-in prices for Claude model families
const DEFAULT_PRICING: &[(&str, ModelPricing)] = &[
    ("claude-opus-4", ModelPricing::new(15.0, 75.0, 18.75, 1.50)),
    ("claude-sonnet-4", ModelPricing::new(3.0, 15.0, 3.75, 0.30)),
    ("claude-3-7-sonnet", ModelPricing::new(3.0, 15.0, 3.75, 0.30)),
    ("claude-3-5-sonnet", ModelPricing::new(3.0, 15.0, 3.75, 0.30)),
    ("claude-3-5-haiku", ModelPricing::new(0.80, 4.0, 1.0, 0.08)),
    ("claude-3-haiku", ModelPricing::new(0.25, 1.25, 0.30, 0.03)),
];

/// Model id → pricing
///
/// Configured entries are layered over the built-in defaults. Lookup tries
/// the exact id first, then the longest key that prefixes the id up to a
/// `-` boundary, so `claude-sonnet-4-20250514` resolves to the
/// `claude-sonnet-4` entry but `gpt-4o` does not resolve to `gpt-4`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ModelPricing>", into = "BTreeMap<String, ModelPricing>")]
pub struct PricingTable {
    models: BTreeMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            models: DEFAULT_PRICING
                .iter()
                .map(|(model, pricing)| (model.to_string(), *pricing))
                .collect(),
        }
    }
}

impl From<BTreeMap<String, ModelPricing>> for PricingTable {
    fn from(overrides: BTreeMap<String, ModelPricing>) -> Self {
        let mut table = Self::default();
        table.models.extend(overrides);
        table
    }
}

impl From<PricingTable> for BTreeMap<String, ModelPricing> {
    fn from(table: PricingTable) -> Self {
        table.models
    }
}

impl PricingTable {
    /// Table with no entries at all, not even the defaults
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.models.get(model) {
            return Some(pricing);
        }
        let found = self
            .models
            .iter()
            .filter(|(key, _)| {
                model
                    .strip_prefix(key.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('-'))
            })
            .max_by_key(|(key, _)| key.len());
        debug!(%model, matched = ?found.map(|(k, _)| k), "PricingTable::get: prefix lookup");
        found.map(|(_, pricing)| pricing)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelPricing)> {
        self.models.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_then_longest_prefix() {
        let mut table = PricingTable::empty();
        table.insert("claude", ModelPricing::new(1.0, 1.0, 0.0, 0.0));
        table.insert("claude-3-5", ModelPricing::new(2.0, 2.0, 0.0, 0.0));
        table.insert("claude-3-5-haiku-x", ModelPricing::new(3.0, 3.0, 0.0, 0.0));

        assert_eq!(table.get("claude-3-5-haiku-x").unwrap().input, 3.0);
        assert_eq!(table.get("claude-3-5-sonnet-20241022").unwrap().input, 2.0);
        assert_eq!(table.get("claude-opus").unwrap().input, 1.0);
        assert!(table.get("gpt-4o").is_none());
    }

    #[test]
    fn test_prefix_stops_at_separator() {
        let mut table = PricingTable::empty();
        table.insert("m", ModelPricing::new(3.0, 3.0, 0.0, 0.0));
        table.insert("gpt-4", ModelPricing::new(30.0, 60.0, 0.0, 0.0));

        assert!(table.get("mystery").is_none());
        assert!(table.get("gpt-4o").is_none());
        assert_eq!(table.get("gpt-4-0613").unwrap().input, 30.0);
        assert_eq!(table.get("m-large").unwrap().input, 3.0);
    }

    #[test]
    fn test_dated_ids_match_defaults() {
        let table = PricingTable::default();
        assert_eq!(table.get("claude-sonnet-4-20250514").unwrap().output, 15.0);
        assert_eq!(table.get("claude-3-5-haiku-latest").unwrap().input, 0.80);
    }

    #[test]
    fn test_costs() {
        let pricing = ModelPricing::new(3.0, 15.0, 3.75, 0.30);
        let cost = pricing.cost(1_000_000, 100_000, 200_000, 500_000);
        assert!((cost - (3.0 + 1.5 + 0.75 + 0.15)).abs() < 1e-9);

        let plain = pricing.cost_without_caching(1_000_000, 100_000, 200_000, 500_000);
        assert!((plain - (1.7 * 3.0 + 1.5)).abs() < 1e-9);
    }

    #[test]
    fn test_yaml_overrides_merge_with_defaults() {
        let table: PricingTable = serde_yaml::from_str(
            r#"
claude-sonnet-4:
  input: 2.0
  output: 10.0
  cache-read: 0.2
custom:
  input: 1.0
"#,
        )
        .unwrap();

        let sonnet = table.get("claude-sonnet-4").unwrap();
        assert_eq!(sonnet.input, 2.0);
        assert_eq!(sonnet.cache_read, 0.2);
        assert_eq!(sonnet.cache_write, 0.0);
        assert_eq!(table.get("custom").unwrap().output, 0.0);
        assert!(table.get("claude-3-haiku-20240307").is_some());
    }
}
