//! Usage ledger and accountant

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::PricingTable;

/// Cumulative usage counters
///
/// Every counter only grows; the ledger lives for the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    /// Requests answered from the response cache
    pub cache_hits: u64,
    /// Requests that reached the service
    pub live_calls: u64,
    pub retries: u64,
    pub preemptive_delays: u64,
    /// Accrued cost in USD
    pub cost: f64,
    /// Cost had no caching of any kind been in effect
    pub cost_without_caching: f64,
}

impl UsageLedger {
    pub fn caching_savings(&self) -> f64 {
        self.cost_without_caching - self.cost
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.live_calls;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Per-model slice of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub live_calls: u64,
    pub cache_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Default)]
struct AccountantInner {
    ledger: UsageLedger,
    models: BTreeMap<String, ModelUsage>,
}

/// Thread-safe recorder over a [`UsageLedger`]
#[derive(Debug)]
pub struct UsageAccountant {
    pricing: PricingTable,
    inner: Mutex<AccountantInner>,
}

impl UsageAccountant {
    pub fn new(pricing: PricingTable) -> Self {
        debug!("UsageAccountant::new: called");
        Self {
            pricing,
            inner: Mutex::new(AccountantInner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, AccountantInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one completed request
    ///
    /// A cache hit bills nothing and counts no tokens; its stored usage is
    /// priced only into `cost_without_caching`.
    pub fn record(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        cache_hit: bool,
        cache_creation_tokens: Option<u64>,
        cache_read_tokens: Option<u64>,
    ) {
        debug!(
            %model,
            prompt_tokens,
            completion_tokens,
            cache_hit,
            ?cache_creation_tokens,
            ?cache_read_tokens,
            "UsageAccountant::record: called"
        );
        let cache_write = cache_creation_tokens.unwrap_or(0);
        let cache_read = cache_read_tokens.unwrap_or(0);
        let pricing = self.pricing.get(model);
        if pricing.is_none() {
            warn!(%model, "No pricing for model, cost not recorded");
        }

        let mut inner = self.inner();
        let AccountantInner { ledger, models } = &mut *inner;
        let per_model = models.entry(model.to_string()).or_default();

        if let Some(p) = pricing {
            ledger.cost_without_caching += p.cost_without_caching(prompt_tokens, completion_tokens, cache_write, cache_read);
        }

        if cache_hit {
            ledger.cache_hits += 1;
            per_model.cache_hits += 1;
            return;
        }

        ledger.live_calls += 1;
        ledger.prompt_tokens += prompt_tokens;
        ledger.completion_tokens += completion_tokens;
        ledger.cache_creation_tokens += cache_write;
        ledger.cache_read_tokens += cache_read;

        per_model.live_calls += 1;
        per_model.prompt_tokens += prompt_tokens;
        per_model.completion_tokens += completion_tokens;

        if let Some(p) = pricing {
            let cost = p.cost(prompt_tokens, completion_tokens, cache_write, cache_read);
            ledger.cost += cost;
            per_model.cost += cost;
        }
    }

    pub fn record_retry(&self) {
        debug!("UsageAccountant::record_retry: called");
        self.inner().ledger.retries += 1;
    }

    pub fn record_preemptive_delay(&self) {
        debug!("UsageAccountant::record_preemptive_delay: called");
        self.inner().ledger.preemptive_delays += 1;
    }

    pub fn snapshot(&self) -> UsageLedger {
        self.inner().ledger.clone()
    }

    /// Human-readable usage summary
    pub fn format_report(&self) -> String {
        let inner = self.inner();
        let l = &inner.ledger;
        let mut out = String::new();

        let _ = writeln!(out, "Usage");
        let _ = writeln!(out, "  live calls:            {}", l.live_calls);
        let _ = writeln!(
            out,
            "  cache hits:            {} ({:.1}%)",
            l.cache_hits,
            l.cache_hit_rate() * 100.0
        );
        let _ = writeln!(out, "  retries:               {}", l.retries);
        let _ = writeln!(out, "  preemptive delays:     {}", l.preemptive_delays);
        let _ = writeln!(out, "  prompt tokens:         {}", l.prompt_tokens);
        let _ = writeln!(out, "  completion tokens:     {}", l.completion_tokens);
        let _ = writeln!(out, "  cache-write tokens:    {}", l.cache_creation_tokens);
        let _ = writeln!(out, "  cache-read tokens:     {}", l.cache_read_tokens);
        let _ = writeln!(out, "Cost");
        let _ = writeln!(out, "  actual:                ${:.4}", l.cost);
        let _ = writeln!(out, "  without caching:       ${:.4}", l.cost_without_caching);
        let _ = writeln!(out, "  savings:               ${:.4}", l.caching_savings());

        if !inner.models.is_empty() {
            let _ = writeln!(out, "Models");
            for (model, usage) in &inner.models {
                let _ = writeln!(
                    out,
                    "  {:<32} calls={} hits={} in={} out={} ${:.4}",
                    model, usage.live_calls, usage.cache_hits, usage.prompt_tokens, usage.completion_tokens, usage.cost
                );
            }
        }
        out
    }
}
