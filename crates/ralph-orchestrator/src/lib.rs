//! Backend selection, rotation, threshold enforcement, and schedule-rule
//! evaluation for one Ralph session. Built on top of `ralph-backend`'s
//! `Backend` trait and `ralph-control`'s live-reloaded configuration.

mod cost;
mod error;
mod model_context;
mod orchestrator;
mod schedule;
mod state;

pub use cost::CostEstimator;
pub use error::OrchestratorError;
pub use model_context::context_length;
pub use orchestrator::{DispatchOutcome, Orchestrator};
pub use schedule::{ScheduleContext, ScheduleEffect};
pub use state::{BackendState, BackendStatus};
