//! Bounded work dispatcher
//!
//! A fixed number of worker futures drain a shared task list. Each worker
//! claims the next unclaimed index, runs it to a terminal outcome, and
//! claims again until nothing is left. Workers are driven together on the
//! calling task with `join_all`, so a worker only yields at its own await
//! points.

use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::CompletionRequest;

/// One unit of work for the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTask {
    /// Submission index, used for ordering and progress
    pub index: usize,
    pub model: String,
    pub request: CompletionRequest,
    pub est_input_tokens: u64,
    pub est_output_tokens: u64,
}

impl PendingTask {
    /// Task with estimates derived from the request itself
    pub fn new(index: usize, model: impl Into<String>, request: CompletionRequest) -> Self {
        let est_input_tokens = request.estimate_input_tokens();
        let est_output_tokens = request.estimate_output_tokens();
        Self {
            index,
            model: model.into(),
            request,
            est_input_tokens,
            est_output_tokens,
        }
    }
}

/// Why a task did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Terminal outcome of one task
#[derive(Debug)]
pub struct TaskOutcome<R, E> {
    pub index: usize,
    pub result: Result<R, TaskError<E>>,
}

impl<R, E> TaskOutcome<R, E> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Progress notification pushed while a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { index: usize },
    Finished { index: usize, ok: bool },
}

/// Point-in-time view of a running batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: Vec<usize>,
    pub peak_in_flight: usize,
}

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    completed: usize,
    failed: usize,
    in_flight: BTreeSet<usize>,
    peak_in_flight: usize,
}

/// Shared progress counters, readable at any time
#[derive(Debug, Default)]
pub struct Progress {
    state: Mutex<ProgressState>,
}

impl Progress {
    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reset(&self, total: usize) {
        *self.state() = ProgressState {
            total,
            ..Default::default()
        };
    }

    fn start(&self, index: usize) {
        let mut state = self.state();
        state.in_flight.insert(index);
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight.len());
    }

    fn finish(&self, index: usize, ok: bool) {
        let mut state = self.state();
        state.in_flight.remove(&index);
        state.completed += 1;
        if !ok {
            state.failed += 1;
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state();
        ProgressSnapshot {
            total: state.total,
            completed: state.completed,
            failed: state.failed,
            in_flight: state.in_flight.iter().copied().collect(),
            peak_in_flight: state.peak_in_flight,
        }
    }
}

/// Runs batches of tasks with at most `concurrency` in flight
#[derive(Debug)]
pub struct Dispatcher {
    concurrency: usize,
    progress: Arc<Progress>,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Dispatcher {
    pub fn new(concurrency: usize) -> Self {
        debug!(%concurrency, "Dispatcher::new: called");
        Self {
            concurrency: concurrency.max(1),
            progress: Arc::new(Progress::default()),
            events: None,
        }
    }

    /// Also push [`ProgressEvent`]s to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Handle for observing progress from elsewhere
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!(?event, "Dispatcher::emit: receiver dropped");
            }
        }
    }

    /// Run every item through `f`, returning outcomes in submission order
    ///
    /// A failing or panicking task is recorded and never stops its siblings.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<TaskOutcome<R, E>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let total = items.len();
        let workers = self.concurrency.min(total);
        info!(total, workers, "Dispatching batch");
        self.progress.reset(total);

        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<T>>> = items.into_iter().map(|item| Mutex::new(Some(item))).collect();
        let outcomes = Mutex::new(Vec::with_capacity(total));

        join_all((0..workers).map(|worker| self.worker(worker, &next, &slots, &f, &outcomes))).await;

        let mut outcomes = outcomes.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        outcomes.sort_by_key(|outcome: &TaskOutcome<R, E>| outcome.index);
        let snapshot = self.progress.snapshot();
        info!(
            completed = snapshot.completed,
            failed = snapshot.failed,
            peak_in_flight = snapshot.peak_in_flight,
            "Batch finished"
        );
        outcomes
    }

    async fn worker<T, R, E, F, Fut>(
        &self,
        worker: usize,
        next: &AtomicUsize,
        slots: &[Mutex<Option<T>>],
        f: &F,
        outcomes: &Mutex<Vec<TaskOutcome<R, E>>>,
    ) where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        debug!(%worker, "Dispatcher::worker: started");
        loop {
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(slot) = slots.get(index) else {
                break;
            };
            let Some(item) = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take() else {
                continue;
            };

            self.progress.start(index);
            self.emit(ProgressEvent::Started { index });

            let result = match AssertUnwindSafe(f(index, item)).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(%index, %message, "Task panicked");
                    Err(TaskError::Panicked(message))
                }
            };

            let ok = result.is_ok();
            self.progress.finish(index, ok);
            self.emit(ProgressEvent::Finished { index, ok });
            outcomes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(TaskOutcome { index, result });
        }
        debug!(%worker, "Dispatcher::worker: queue drained");
    }
}
