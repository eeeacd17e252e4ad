//! Scheduler implementation

use std::sync::Arc;

use responsecache::request_key;
use tracing::{debug, error, info, warn};

use super::budget::BudgetTracker;
use super::config::SchedulerConfig;
use super::retry::RetryPolicy;
use super::state::{InvalidTransition, RequestEvent, RequestState};
use crate::cache::{KeyLocks, ResponseCache};
use crate::dispatch::{Dispatcher, PendingTask, TaskOutcome};
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError};
use crate::usage::{PricingTable, UsageAccountant, UsageLedger};

/// Errors returned for a single request
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Rate limit retries exhausted for {model} after {attempts} attempts: {last}")]
    RetryExhausted { model: String, attempts: u32, last: LlmError },

    #[error(transparent)]
    Service(#[from] LlmError),

    #[error("Failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Governs every call to the inference service
///
/// Each request passes through cache lookup, the preemptive throttle, the
/// call itself and, on rate-limit rejection, backoff and retry. With a cache
/// configured, identical requests in flight at once make a single call.
pub struct Scheduler {
    client: Arc<dyn LlmClient>,
    cache: Option<Arc<dyn ResponseCache>>,
    in_flight: KeyLocks,
    budget: BudgetTracker,
    retry: RetryPolicy,
    usage: UsageAccountant,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        client: Arc<dyn LlmClient>,
        cache: Option<Arc<dyn ResponseCache>>,
        pricing: PricingTable,
    ) -> Self {
        debug!(?config, cache = cache.is_some(), "Scheduler::new: called");
        Self {
            client,
            cache,
            in_flight: KeyLocks::default(),
            budget: BudgetTracker::new(config),
            retry: RetryPolicy::new(config),
            usage: UsageAccountant::new(pricing),
        }
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.usage
    }

    /// Snapshot of cumulative usage
    pub fn usage(&self) -> UsageLedger {
        self.usage.snapshot()
    }

    /// Run one request to a terminal outcome
    ///
    /// `model` is written into the request before keying, so the cache key
    /// always names the model that would serve it.
    pub async fn execute_request(
        &self,
        model: &str,
        mut request: CompletionRequest,
        est_input_tokens: u64,
        est_output_tokens: u64,
    ) -> Result<CompletionResponse, SchedulerError> {
        debug!(%model, est_input_tokens, est_output_tokens, "Scheduler::execute_request: called");
        request.model = model.to_string();
        let key = request_key(&request)?;

        let mut state = RequestState::Idle;
        let mut last_event = RequestEvent::CacheMiss;
        let mut attempts = 0u32;
        let mut rejections = 0u32;
        let mut rejection: Option<LlmError> = None;
        let mut _claim = None;

        loop {
            let event = match state {
                RequestState::Idle => {
                    let mut cached = self.cache_lookup(&key).await;
                    if cached.is_none() && self.cache.is_some() {
                        // Whoever holds the key is calling for it; wait, then look again
                        _claim = Some(self.in_flight.acquire(&key).await);
                        cached = self.cache_lookup(&key).await;
                    }
                    match cached {
                        Some(cached) => {
                            debug!(%model, %key, "Scheduler::execute_request: cache hit");
                            self.record_usage(model, &cached, true);
                            advance(&mut state, RequestEvent::CacheHit)?;
                            return Ok(cached);
                        }
                        None => RequestEvent::CacheMiss,
                    }
                }

                RequestState::Throttled => {
                    let check = self.budget.check_budget(model, est_input_tokens, est_output_tokens);
                    if check.wait {
                        info!(%model, reason = ?check.reason(), wait_ms = check.wait_ms, "Delaying call for budget");
                        tokio::time::sleep(check.wait_duration()).await;
                        self.usage.record_preemptive_delay();
                        RequestEvent::BudgetWait
                    } else {
                        RequestEvent::BudgetClear
                    }
                }

                RequestState::InFlight => {
                    attempts += 1;
                    debug!(%model, attempts, "Scheduler::execute_request: calling service");
                    match self.client.complete(request.clone()).await {
                        Ok(response) => {
                            self.budget.update_budget(model, &response.rate_limits);
                            self.cache_store(&key, &response).await;
                            self.record_usage(model, &response, false);
                            advance(&mut state, RequestEvent::CallSucceeded)?;
                            return Ok(response);
                        }
                        Err(e) if e.is_rate_limit() => {
                            if let Some(metadata) = e.rate_limits() {
                                self.budget.update_budget(model, metadata);
                            }
                            rejections += 1;
                            warn!(%model, attempts, rejections, error = %e, "Rate limited by service");
                            rejection = Some(e);
                            RequestEvent::RateLimited
                        }
                        Err(e) => {
                            if let Some(metadata) = e.rate_limits() {
                                self.budget.update_budget(model, metadata);
                            }
                            error!(%model, attempts, error = %e, "Service call failed");
                            advance(&mut state, RequestEvent::CallFailed)?;
                            return Err(SchedulerError::Service(e));
                        }
                    }
                }

                RequestState::Retrying => {
                    if self.retry.is_exhausted(rejections) {
                        advance(&mut state, RequestEvent::RetriesExhausted)?;
                        error!(%model, attempts, "Giving up after repeated rate limits");
                        let last = rejection.take().unwrap_or_else(|| LlmError::rate_limited(None));
                        return Err(SchedulerError::RetryExhausted {
                            model: model.to_string(),
                            attempts,
                            last,
                        });
                    }
                    let metadata = rejection
                        .as_ref()
                        .and_then(LlmError::rate_limits)
                        .copied()
                        .unwrap_or_default();
                    let delay = self.retry.compute_backoff(rejections, &metadata);
                    info!(%model, rejections, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                    self.usage.record_retry();
                    tokio::time::sleep(delay).await;
                    RequestEvent::BackoffElapsed
                }

                RequestState::Succeeded | RequestState::Failed => {
                    return Err(InvalidTransition {
                        state,
                        event: last_event,
                    }
                    .into());
                }
            };
            advance(&mut state, event)?;
            last_event = event;
        }
    }

    /// Run a batch of tasks through `dispatcher`
    pub async fn execute_all(
        &self,
        tasks: Vec<PendingTask>,
        dispatcher: &Dispatcher,
    ) -> Vec<TaskOutcome<CompletionResponse, SchedulerError>> {
        debug!(task_count = tasks.len(), "Scheduler::execute_all: called");
        dispatcher
            .run(tasks, |_, task: PendingTask| async move {
                self.execute_request(&task.model, task.request, task.est_input_tokens, task.est_output_tokens)
                    .await
            })
            .await
    }

    /// Look up a cached response; any store failure is a miss
    async fn cache_lookup(&self, key: &str) -> Option<CompletionResponse> {
        let cache = self.cache.as_ref()?;
        let stored = match cache.get(key).await {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(%key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&stored) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(%key, error = %e, "Cached response unreadable, treating as miss");
                None
            }
        }
    }

    async fn cache_store(&self, key: &str, response: &CompletionResponse) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let value = match serde_json::to_string(response) {
            Ok(value) => value,
            Err(e) => {
                warn!(%key, error = %e, "Response not serializable, not cached");
                return;
            }
        };
        if let Err(e) = cache.set(key, value).await {
            warn!(%key, error = %e, "Cache write failed");
        }
    }

    fn record_usage(&self, model: &str, response: &CompletionResponse, cache_hit: bool) {
        let usage = &response.usage;
        self.usage.record(
            model,
            usage.input_tokens,
            usage.output_tokens,
            cache_hit,
            Some(usage.cache_creation_tokens),
            Some(usage.cache_read_tokens),
        );
    }
}

fn advance(state: &mut RequestState, event: RequestEvent) -> Result<(), InvalidTransition> {
    let next = state.on(event)?;
    debug!(from = %state, ?event, to = %next, "Scheduler::advance: transition");
    *state = next;
    Ok(())
}
