//! JSONL batch input and output
//!
//! Input is one request per line:
//!
//! ```text
//! {"model": "...", "system": "...", "messages": [...], "max_tokens": 512, "est_input_tokens": 900}
//! ```
//!
//! `model` falls back to the configured default; missing estimates are
//! derived from the request. Blank lines and lines starting with `#` are
//! skipped.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::{PendingTask, TaskOutcome};
use crate::llm::{CompletionRequest, CompletionResponse};
use crate::scheduler::SchedulerError;

/// Errors reading a batch file
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse { line: usize, source: serde_json::Error },
}

/// One input line
#[derive(Debug, Clone, Deserialize)]
struct RequestLine {
    #[serde(flatten)]
    request: CompletionRequest,
    est_input_tokens: Option<u64>,
    est_output_tokens: Option<u64>,
}

/// One output line
#[derive(Debug, Serialize)]
pub struct ResponseLine {
    pub index: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CompletionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskOutcome<CompletionResponse, SchedulerError>> for ResponseLine {
    fn from(outcome: TaskOutcome<CompletionResponse, SchedulerError>) -> Self {
        match outcome.result {
            Ok(response) => Self {
                index: outcome.index,
                ok: true,
                response: Some(response),
                error: None,
            },
            Err(e) => Self {
                index: outcome.index,
                ok: false,
                response: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Parse a JSONL batch into tasks, indexed in file order
pub fn read_tasks<R: BufRead>(reader: R, default_model: &str) -> Result<Vec<PendingTask>, BatchError> {
    debug!(%default_model, "read_tasks: called");
    let mut tasks = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: RequestLine =
            serde_json::from_str(trimmed).map_err(|source| BatchError::Parse { line: n + 1, source })?;

        let model = if parsed.request.model.is_empty() {
            default_model.to_string()
        } else {
            parsed.request.model.clone()
        };
        let mut task = PendingTask::new(tasks.len(), model, parsed.request);
        if let Some(est) = parsed.est_input_tokens {
            task.est_input_tokens = est;
        }
        if let Some(est) = parsed.est_output_tokens {
            task.est_output_tokens = est;
        }
        tasks.push(task);
    }
    debug!(task_count = tasks.len(), "read_tasks: parsed");
    Ok(tasks)
}
