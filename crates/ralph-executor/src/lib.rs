//! The iteration driver: per-session prompt reload, context assembly,
//! schedule evaluation, orchestrator dispatch, and memory recording, tying
//! together `ralph-types`, `ralph-control`, `ralph-orchestrator`, and
//! `ralph-memory` into one run loop.

mod context;
mod error;
mod executor;

pub use context::{build_context_block, compute_budget, estimate_tokens, read_static_project_text, wrap_prompt};
pub use error::ExecutorError;
pub use executor::{Executor, RunSummary, StopReason, SummaryGenerator};
