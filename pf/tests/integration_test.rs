//! End-to-end tests through the public API

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use protoforge::batch::read_tasks;
use protoforge::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, TokenUsage};
use protoforge::{
    Dispatcher, MemoryCache, PricingTable, RateLimitMetadata, ResponseCache, Scheduler, SchedulerConfig,
    SchedulerError, SqliteCache, TaskError, WindowInfo,
};

const MODEL: &str = "claude-sonnet-4-20250514";

/// Service stand-in that echoes the prompt and tracks concurrency
#[derive(Default)]
struct EchoService {
    calls: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    reject_first: AtomicUsize,
}

impl EchoService {
    fn rejecting(first: usize) -> Self {
        Self {
            reject_first: AtomicUsize::new(first),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LlmClient for EchoService {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.live.fetch_sub(1, Ordering::SeqCst);

        if self
            .reject_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LlmError::rate_limited(Some(Duration::from_millis(100))));
        }

        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let mut response = CompletionResponse::text(
            format!("echo: {}", prompt),
            TokenUsage {
                input_tokens: 20,
                output_tokens: 10,
                ..Default::default()
            },
        );
        response.rate_limits = RateLimitMetadata {
            requests: Some(WindowInfo::resetting_in(1_000, 900, Duration::from_secs(60))),
            ..Default::default()
        };
        Ok(response)
    }
}

fn request(text: &str) -> CompletionRequest {
    CompletionRequest {
        model: String::new(),
        system_prompt: String::new(),
        messages: vec![Message::user(text)],
        max_tokens: 64,
        temperature: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_respects_concurrency_and_orders_outcomes() {
    let service = Arc::new(EchoService::default());
    let sched = Scheduler::new(&SchedulerConfig::default(), service.clone(), None, PricingTable::default());

    let input = (0..7)
        .map(|i| format!(r#"{{"messages": [{{"role": "user", "content": "op {}"}}], "max_tokens": 64}}"#, i))
        .collect::<Vec<_>>()
        .join("\n");
    let tasks = read_tasks(Cursor::new(input), MODEL).unwrap();

    let dispatcher = Dispatcher::new(3);
    let outcomes = sched.execute_all(tasks, &dispatcher).await;

    assert_eq!(outcomes.len(), 7);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.index, i);
        let response = outcome.result.as_ref().unwrap();
        assert_eq!(response.content.as_deref(), Some(format!("echo: op {}", i).as_str()));
    }
    assert!(service.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(service.calls.load(Ordering::SeqCst), 7);

    let ledger = sched.usage();
    assert_eq!(ledger.live_calls, 7);
    assert_eq!(ledger.prompt_tokens, 140);
    assert!((ledger.cost - (ledger.cost_without_caching - ledger.caching_savings())).abs() < 1e-12);

    let budget = sched.budget().snapshot(MODEL).unwrap();
    assert!(budget.initialized);
    assert_eq!(budget.requests.unwrap().remaining, 900);
}

#[tokio::test]
async fn test_sqlite_cache_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("cache").join("responses.db");

    let service = Arc::new(EchoService::default());
    {
        let cache: Arc<dyn ResponseCache> = Arc::new(SqliteCache::open(&path).unwrap());
        let sched = Scheduler::new(&SchedulerConfig::default(), service.clone(), Some(cache), PricingTable::default());
        sched.execute_request(MODEL, request("GET /pets"), 5, 64).await.unwrap();
    }

    let cache: Arc<dyn ResponseCache> = Arc::new(SqliteCache::open(&path).unwrap());
    let sched = Scheduler::new(&SchedulerConfig::default(), service.clone(), Some(cache.clone()), PricingTable::default());
    let response = sched.execute_request(MODEL, request("GET /pets"), 5, 64).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("echo: GET /pets"));
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    assert_eq!(sched.usage().cache_hits, 1);
    assert!(sched.budget().snapshot(MODEL).is_none());
    assert_eq!(cache.stats().await.unwrap().entry_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_requests_in_batch_after_warm_cache() {
    let service = Arc::new(EchoService::default());
    let cache: Arc<dyn ResponseCache> = Arc::new(MemoryCache::new());
    let sched = Scheduler::new(&SchedulerConfig::default(), service.clone(), Some(cache), PricingTable::default());

    sched.execute_request(MODEL, request("same"), 5, 64).await.unwrap();

    let tasks = (0..4)
        .map(|i| protoforge::PendingTask::new(i, MODEL, request("same")))
        .collect();
    let outcomes = sched.execute_all(tasks, &Dispatcher::new(2)).await;

    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    assert_eq!(sched.usage().cache_hits, 4);
}

#[tokio::test(start_paused = true)]
async fn test_identical_requests_in_flight_together_call_once() {
    let service = Arc::new(EchoService::default());
    let cache: Arc<dyn ResponseCache> = Arc::new(MemoryCache::new());
    let sched = Scheduler::new(&SchedulerConfig::default(), service.clone(), Some(cache), PricingTable::default());

    let tasks = vec![
        protoforge::PendingTask::new(0, MODEL, request("dup")),
        protoforge::PendingTask::new(1, MODEL, request("dup")),
        protoforge::PendingTask::new(2, MODEL, request("other")),
    ];
    let outcomes = sched.execute_all(tasks, &Dispatcher::new(3)).await;

    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(outcomes[1].result.as_ref().unwrap().content.as_deref(), Some("echo: dup"));
    assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.peak.load(Ordering::SeqCst), 2);

    let ledger = sched.usage();
    assert_eq!(ledger.live_calls, 2);
    assert_eq!(ledger.cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_batch_recovers_or_reports() {
    let service = Arc::new(EchoService::rejecting(2));
    let config = SchedulerConfig {
        max_retries: 1,
        ..Default::default()
    };
    let sched = Scheduler::new(&config, service.clone(), None, PricingTable::default());

    // One worker: the first request is rejected twice and runs out of retries,
    // the second goes through on its first attempt.
    let tasks = vec![
        protoforge::PendingTask::new(0, MODEL, request("a")),
        protoforge::PendingTask::new(1, MODEL, request("b")),
    ];
    let outcomes = sched.execute_all(tasks, &Dispatcher::new(1)).await;

    assert!(matches!(
        &outcomes[0].result,
        Err(TaskError::Failed(SchedulerError::RetryExhausted { attempts: 2, .. }))
    ));
    assert!(outcomes[1].is_ok());
    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    assert_eq!(sched.usage().retries, 1);
}
