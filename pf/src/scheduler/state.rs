//! Request lifecycle state machine
//!
//! ```text
//!            CacheHit
//!   Idle ─────────────────────────────────────► Succeeded
//!    │ CacheMiss                                   ▲
//!    ▼          BudgetClear          CallSucceeded │
//!   Throttled ───────────────► InFlight ───────────┘
//!    ▲  │ BudgetWait              │ │ CallFailed
//!    │  └──► Throttled            │ └──────────────► Failed
//!    │                RateLimited ▼                    ▲
//!    └──────────────────────── Retrying ───────────────┘
//!         BackoffElapsed              RetriesExhausted
//! ```

use std::fmt;

/// Where a single logical request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Idle,
    Throttled,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

/// Trigger for a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    CacheHit,
    CacheMiss,
    BudgetWait,
    BudgetClear,
    CallSucceeded,
    CallFailed,
    RateLimited,
    BackoffElapsed,
    RetriesExhausted,
}

/// An event that has no transition from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {event:?} in state {state:?}")]
pub struct InvalidTransition {
    pub state: RequestState,
    pub event: RequestEvent,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }

    /// Apply an event, returning the next state
    pub fn on(self, event: RequestEvent) -> Result<RequestState, InvalidTransition> {
        use RequestEvent::*;
        use RequestState::*;

        let next = match (self, event) {
            (Idle, CacheHit) => Succeeded,
            (Idle, CacheMiss) => Throttled,
            (Throttled, BudgetWait) => Throttled,
            (Throttled, BudgetClear) => InFlight,
            (InFlight, CallSucceeded) => Succeeded,
            (InFlight, CallFailed) => Failed,
            (InFlight, RateLimited) => Retrying,
            (Retrying, BackoffElapsed) => Throttled,
            (Retrying, RetriesExhausted) => Failed,
            (state, event) => return Err(InvalidTransition { state, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Idle => "idle",
            RequestState::Throttled => "throttled",
            RequestState::InFlight => "in-flight",
            RequestState::Retrying => "retrying",
            RequestState::Succeeded => "succeeded",
            RequestState::Failed => "failed",
        };
        f.write_str(name)
    }
}
