//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Concurrent workers draining the task queue
    pub max_concurrent: usize,

    /// Rate-limit retries allowed per request after the first attempt
    pub max_retries: u32,

    /// Request window length used when rolling an expired window
    pub request_window_secs: u64,

    /// Input-token window length used when rolling an expired window
    pub input_token_window_secs: u64,

    /// Output-token window length used when rolling an expired window
    pub output_token_window_secs: u64,

    /// Ceiling on a single preemptive throttle sleep
    pub max_wait_ms: u64,

    /// Added to a service-provided retry hint
    pub retry_margin_ms: u64,

    /// Ceiling on exponential backoff (with jitter)
    pub max_backoff_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_retries: 5,
            request_window_secs: 60,
            input_token_window_secs: 60,
            output_token_window_secs: 60,
            max_wait_ms: 60_000,
            retry_margin_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl SchedulerConfig {
    pub fn request_window(&self) -> Duration {
        Duration::from_secs(self.request_window_secs)
    }

    pub fn input_token_window(&self) -> Duration {
        Duration::from_secs(self.input_token_window_secs)
    }

    pub fn output_token_window(&self) -> Duration {
        Duration::from_secs(self.output_token_window_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn retry_margin(&self) -> Duration {
        Duration::from_millis(self.retry_margin_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_wait(), Duration::from_secs(60));
        assert_eq!(config.retry_margin(), Duration::from_secs(1));
    }

    #[test]
    fn test_kebab_case_keys() {
        let config: SchedulerConfig = serde_yaml::from_str("max-concurrent: 2\nrequest-window-secs: 10\n").unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.request_window(), Duration::from_secs(10));
        assert_eq!(config.input_token_window(), Duration::from_secs(60));
    }
}
