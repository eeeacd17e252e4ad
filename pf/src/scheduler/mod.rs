//! Scheduler - budget-aware access to the inference service
//!
//! Every request flows Idle → (cache) → Throttled → InFlight, looping back
//! through Retrying on rate-limit rejection. See [`RequestState`].

mod budget;
mod config;
mod core;
mod retry;
mod state;

pub use budget::{BudgetCheck, BudgetTracker, Constraint, ModelBudget, Window};
pub use config::SchedulerConfig;
pub use self::core::{Scheduler, SchedulerError};
pub use retry::RetryPolicy;
pub use state::{InvalidTransition, RequestEvent, RequestState};
