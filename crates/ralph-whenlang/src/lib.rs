//! WhenLang predicate evaluation and cron-expression matching for schedule
//! rules.
//!
//! Both halves of this crate are intentionally total: a schedule rule
//! authored by a user in the control document must never be able to crash
//! the orchestrator just because its `when` or `cron` field is malformed.
//! Parse failures and evaluation failures alike resolve to "does not
//! match" rather than an error.

mod cron;
mod when;

pub use cron::{CronExpr, CronGate};
pub use when::{eval, Facts};
