//! Per-model rate-limit budgets and the preemptive throttle check
//!
//! Each model identity owns three sliding windows (requests, input tokens,
//! output tokens). Windows are seeded from authoritative service metadata
//! and locally reserved against between updates. A model with no seeded
//! window is unconstrained.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::SchedulerConfig;
use crate::llm::{RateLimitMetadata, WindowInfo};

/// One rate-limit window
///
/// `remaining` never exceeds `limit`; `reset_at` never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Instant,
}

impl Window {
    /// Refill the window if its reset time has passed
    fn roll(&mut self, now: Instant, length: Duration) -> bool {
        if self.reset_at <= now {
            self.remaining = self.limit;
            self.reset_at = now + length;
            return true;
        }
        false
    }

    /// Units needed before a call may proceed
    ///
    /// Clamped to `limit` so an estimate larger than the whole window can
    /// still go through once the window is full.
    fn required(&self, estimate: u64) -> u64 {
        estimate.min(self.limit)
    }

    fn reserve(&mut self, amount: u64) {
        self.remaining = self.remaining.saturating_sub(amount);
    }

    fn overwrite(&mut self, info: &WindowInfo) {
        self.limit = info.limit;
        self.remaining = info.remaining.min(info.limit);
        self.reset_at = self.reset_at.max(info.reset_at);
    }
}

impl From<&WindowInfo> for Window {
    fn from(info: &WindowInfo) -> Self {
        Self {
            limit: info.limit,
            remaining: info.remaining.min(info.limit),
            reset_at: info.reset_at,
        }
    }
}

/// Budget state for one model identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelBudget {
    pub requests: Option<Window>,
    pub input_tokens: Option<Window>,
    pub output_tokens: Option<Window>,
    pub initialized: bool,
}

/// Which window blocked a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Requests,
    InputTokens,
    OutputTokens,
}

impl Constraint {
    pub fn reason(&self) -> &'static str {
        match self {
            Constraint::Requests => "Request limit reached",
            Constraint::InputTokens => "Input token limit reached",
            Constraint::OutputTokens => "Output token limit reached",
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Result of a budget check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetCheck {
    pub wait: bool,
    pub wait_ms: u64,
    pub constraint: Option<Constraint>,
}

impl BudgetCheck {
    fn proceed() -> Self {
        Self {
            wait: false,
            wait_ms: 0,
            constraint: None,
        }
    }

    /// Human-readable name of the tightest constraint
    pub fn reason(&self) -> Option<&'static str> {
        self.constraint.map(|c| c.reason())
    }

    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

/// Window lengths used when rolling an expired window
#[derive(Debug, Clone, Copy)]
struct WindowLengths {
    requests: Duration,
    input_tokens: Duration,
    output_tokens: Duration,
}

/// Tracks budgets for every model identity seen
///
/// All state sits behind one mutex; no lock is held across an await.
#[derive(Debug)]
pub struct BudgetTracker {
    budgets: Mutex<HashMap<String, ModelBudget>>,
    lengths: WindowLengths,
    max_wait: Duration,
}

impl BudgetTracker {
    pub fn new(config: &SchedulerConfig) -> Self {
        debug!(?config, "BudgetTracker::new: called");
        Self {
            budgets: Mutex::new(HashMap::new()),
            lengths: WindowLengths {
                requests: config.request_window(),
                input_tokens: config.input_token_window(),
                output_tokens: config.output_token_window(),
            },
            max_wait: config.max_wait(),
        }
    }

    fn budgets(&self) -> MutexGuard<'_, HashMap<String, ModelBudget>> {
        self.budgets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide whether a call with the given estimates must wait
    ///
    /// When it need not, capacity for the estimates is reserved before
    /// returning.
    pub fn check_budget(&self, model: &str, est_input_tokens: u64, est_output_tokens: u64) -> BudgetCheck {
        self.check_budget_at(model, est_input_tokens, est_output_tokens, Instant::now())
    }

    /// [`check_budget`](Self::check_budget) against an explicit clock reading
    pub fn check_budget_at(&self, model: &str, est_input_tokens: u64, est_output_tokens: u64, now: Instant) -> BudgetCheck {
        debug!(%model, est_input_tokens, est_output_tokens, "BudgetTracker::check_budget: called");
        let mut budgets = self.budgets();
        let budget = budgets.entry(model.to_string()).or_default();

        if !budget.initialized {
            debug!(%model, "BudgetTracker::check_budget: uninitialized, proceeding");
            return BudgetCheck::proceed();
        }

        let checks = [
            (Constraint::Requests, budget.requests.as_mut(), self.lengths.requests, 1),
            (Constraint::InputTokens, budget.input_tokens.as_mut(), self.lengths.input_tokens, est_input_tokens),
            (Constraint::OutputTokens, budget.output_tokens.as_mut(), self.lengths.output_tokens, est_output_tokens),
        ];

        let mut tightest: Option<(Constraint, Duration)> = None;
        let mut windows = Vec::with_capacity(3);
        for (constraint, window, length, needed) in checks {
            let Some(window) = window else {
                continue;
            };
            if window.roll(now, length) {
                debug!(%model, ?constraint, "BudgetTracker::check_budget: window rolled");
            }
            if window.remaining < window.required(needed) {
                let until_reset = window.reset_at.saturating_duration_since(now);
                debug!(%model, ?constraint, remaining = window.remaining, needed, ?until_reset, "BudgetTracker::check_budget: constraint failed");
                if tightest.is_none_or(|(_, longest)| until_reset > longest) {
                    tightest = Some((constraint, until_reset));
                }
            }
            windows.push((window, needed));
        }

        if let Some((constraint, until_reset)) = tightest {
            // Round up so a sub-millisecond reset still sleeps
            let wait_ms = until_reset.min(self.max_wait).as_nanos().div_ceil(1_000_000) as u64;
            info!(%model, %constraint, wait_ms, "Throttling before call");
            return BudgetCheck {
                wait: true,
                wait_ms,
                constraint: Some(constraint),
            };
        }

        for (window, needed) in windows {
            window.reserve(needed);
        }
        debug!(%model, "BudgetTracker::check_budget: reserved");
        BudgetCheck::proceed()
    }

    /// Overwrite local state with authoritative service metadata
    ///
    /// Only the windows present in `metadata` are touched.
    pub fn update_budget(&self, model: &str, metadata: &RateLimitMetadata) {
        if !metadata.has_windows() {
            debug!(%model, "BudgetTracker::update_budget: no windows in metadata");
            return;
        }
        debug!(%model, ?metadata, "BudgetTracker::update_budget: called");

        let mut budgets = self.budgets();
        let budget = budgets.entry(model.to_string()).or_default();
        for (slot, info) in [
            (&mut budget.requests, metadata.requests.as_ref()),
            (&mut budget.input_tokens, metadata.input_tokens.as_ref()),
            (&mut budget.output_tokens, metadata.output_tokens.as_ref()),
        ] {
            if let Some(info) = info {
                match slot {
                    Some(window) => window.overwrite(info),
                    None => *slot = Some(Window::from(info)),
                }
            }
        }
        budget.initialized = true;
    }

    /// Current budget for a model, if it has been seen
    pub fn snapshot(&self, model: &str) -> Option<ModelBudget> {
        self.budgets().get(model).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> BudgetTracker {
        BudgetTracker::new(&SchedulerConfig::default())
    }

    fn window(limit: u64, remaining: u64, reset_at: Instant) -> Option<WindowInfo> {
        Some(WindowInfo {
            limit,
            remaining,
            reset_at,
        })
    }

    #[test]
    fn test_uninitialized_never_waits() {
        let tracker = tracker();
        for _ in 0..1000 {
            let check = tracker.check_budget("m", 1_000_000, 1_000_000);
            assert!(!check.wait);
        }
        assert!(!tracker.snapshot("m").unwrap().initialized);
    }

    #[test]
    fn test_sub_millisecond_reset_still_waits() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(50, 0, now + Duration::from_micros(300)),
                ..Default::default()
            },
        );

        let check = tracker.check_budget_at("m", 1, 1, now);
        assert!(check.wait);
        assert_eq!(check.wait_ms, 1);
        assert!(check.wait_duration() > Duration::ZERO);
    }

    #[test]
    fn test_request_limit_reached() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(50, 0, now + Duration::from_millis(5000)),
                ..Default::default()
            },
        );

        let check = tracker.check_budget_at("m", 100, 100, now);
        assert!(check.wait);
        assert_eq!(check.wait_ms, 5000);
        assert_eq!(check.reason(), Some("Request limit reached"));
    }

    #[test]
    fn test_reservation_decrements_all_windows() {
        let tracker = tracker();
        let now = Instant::now();
        let reset = now + Duration::from_secs(30);
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(50, 10, reset),
                input_tokens: window(10_000, 5_000, reset),
                output_tokens: window(4_000, 4_000, reset),
                retry_after: None,
            },
        );

        let check = tracker.check_budget_at("m", 1_200, 300, now);
        assert!(!check.wait);

        let budget = tracker.snapshot("m").unwrap();
        assert_eq!(budget.requests.unwrap().remaining, 9);
        assert_eq!(budget.input_tokens.unwrap().remaining, 3_800);
        assert_eq!(budget.output_tokens.unwrap().remaining, 3_700);
    }

    #[test]
    fn test_tightest_constraint_has_longest_wait() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(50, 0, now + Duration::from_secs(2)),
                input_tokens: window(10_000, 10, now + Duration::from_secs(20)),
                output_tokens: window(4_000, 0, now + Duration::from_secs(8)),
                retry_after: None,
            },
        );

        let check = tracker.check_budget_at("m", 100, 100, now);
        assert_eq!(check.constraint, Some(Constraint::InputTokens));
        assert_eq!(check.wait_ms, 20_000);

        // nothing reserved while waiting
        assert_eq!(tracker.snapshot("m").unwrap().input_tokens.unwrap().remaining, 10);
    }

    #[test]
    fn test_wait_is_capped() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                output_tokens: window(100, 0, now + Duration::from_secs(3600)),
                ..Default::default()
            },
        );

        let check = tracker.check_budget_at("m", 1, 1, now);
        assert_eq!(check.wait_ms, 60_000);
        assert_eq!(check.reason(), Some("Output token limit reached"));
    }

    #[test]
    fn test_expired_window_rolls_over() {
        let tracker = tracker();
        let start = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(5, 0, start + Duration::from_secs(1)),
                ..Default::default()
            },
        );
        assert!(tracker.check_budget_at("m", 0, 0, start).wait);

        let later = start + Duration::from_secs(2);
        let check = tracker.check_budget_at("m", 0, 0, later);
        assert!(!check.wait);

        let requests = tracker.snapshot("m").unwrap().requests.unwrap();
        assert_eq!(requests.remaining, 4);
        assert_eq!(requests.reset_at, later + Duration::from_secs(60));
    }

    #[test]
    fn test_authoritative_update_overrides_reservations() {
        let tracker = tracker();
        let now = Instant::now();
        let reset = now + Duration::from_secs(60);
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                input_tokens: window(1_000, 1_000, reset),
                ..Default::default()
            },
        );

        // Optimistic reservations drain the window
        assert!(!tracker.check_budget_at("m", 600, 0, now).wait);
        assert!(tracker.check_budget_at("m", 600, 0, now).wait);

        // Service reports the calls were smaller than estimated
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                input_tokens: window(1_000, 900, reset),
                ..Default::default()
            },
        );
        assert_eq!(tracker.snapshot("m").unwrap().input_tokens.unwrap().remaining, 900);
        assert!(!tracker.check_budget_at("m", 600, 0, now).wait);
        assert_eq!(tracker.snapshot("m").unwrap().input_tokens.unwrap().remaining, 300);
    }

    #[test]
    fn test_reset_never_moves_backwards() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(10, 5, now + Duration::from_secs(30)),
                ..Default::default()
            },
        );
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                requests: window(10, 2, now + Duration::from_secs(10)),
                ..Default::default()
            },
        );

        let requests = tracker.snapshot("m").unwrap().requests.unwrap();
        assert_eq!(requests.remaining, 2);
        assert_eq!(requests.reset_at, now + Duration::from_secs(30));
    }

    #[test]
    fn test_estimate_larger_than_limit_is_clamped() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                output_tokens: window(1_000, 1_000, now + Duration::from_secs(60)),
                ..Default::default()
            },
        );

        assert!(!tracker.check_budget_at("m", 0, 5_000, now).wait);
        assert_eq!(tracker.snapshot("m").unwrap().output_tokens.unwrap().remaining, 0);
    }

    #[test]
    fn test_models_are_independent() {
        let tracker = tracker();
        let now = Instant::now();
        tracker.update_budget(
            "a",
            &RateLimitMetadata {
                requests: window(1, 0, now + Duration::from_secs(10)),
                ..Default::default()
            },
        );

        assert!(tracker.check_budget_at("a", 0, 0, now).wait);
        assert!(!tracker.check_budget_at("b", 0, 0, now).wait);
    }

    #[test]
    fn test_retry_hint_alone_does_not_initialize() {
        let tracker = tracker();
        tracker.update_budget(
            "m",
            &RateLimitMetadata {
                retry_after: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        );
        assert!(tracker.snapshot("m").is_none());
    }
}
