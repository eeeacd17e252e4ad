//! Protoforge - budget-aware scheduling for a metered inference service
//!
//! Protoforge issues large batches of calls to a rate-limited, per-token
//! billed inference API. The scheduler decides *when* and *how many at
//! once*, never *what* to ask.
//!
//! # Core Concepts
//!
//! - **Preemptive throttle**: per-model request and token windows are
//!   tracked locally and a call waits before it would be rejected
//! - **Authoritative updates**: every reply resets local windows to what
//!   the service reports
//! - **Bounded retry**: rate-limit rejections back off and retry up to a
//!   ceiling; other failures surface immediately
//! - **Response cache**: identical requests are answered from a durable
//!   SQLite store without touching the budget
//! - **Accounting**: tokens, hits, retries and cost, including what the
//!   run would have cost without caching
//!
//! # Modules
//!
//! - [`scheduler`] - budget tracker, retry policy, request state machine
//! - [`dispatch`] - bounded-concurrency worker pool
//! - [`cache`] - response cache trait and implementations
//! - [`usage`] - pricing and the usage ledger
//! - [`llm`] - inference client trait and Anthropic implementation
//! - [`batch`] - JSONL request/response files
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod scheduler;
pub mod usage;

pub use cache::{MemoryCache, ResponseCache, SqliteCache};
pub use config::{CacheConfig, Config, LlmConfig};
pub use dispatch::{Dispatcher, PendingTask, Progress, ProgressEvent, ProgressSnapshot, TaskError, TaskOutcome};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, RateLimitMetadata, TokenUsage,
    WindowInfo, create_client,
};
pub use scheduler::{BudgetCheck, BudgetTracker, RequestState, RetryPolicy, Scheduler, SchedulerConfig, SchedulerError};
pub use usage::{ModelPricing, PricingTable, UsageAccountant, UsageLedger};
