//! Schedule-rule trigger matching. Rule evaluation order and "first match
//! wins" live in [`crate::Orchestrator::evaluate_schedule`]; this module
//! only decides whether a single trigger fires.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ralph_control::ScheduleTrigger;
use ralph_whenlang::{CronExpr, CronGate, Facts};

/// The facts a schedule rule is evaluated against for one iteration.
#[derive(Debug, Clone)]
pub struct ScheduleContext {
    pub iteration: u64,
    pub error_count: u64,
    pub consec_errors: u64,
    pub cost: f64,
    pub tokens: u64,
    pub elapsed_minutes: f64,
    pub has_error: bool,
    pub last_error: Option<String>,
    pub now: DateTime<Utc>,
}

impl ScheduleContext {
    fn facts(&self) -> Facts {
        Facts {
            iteration: self.iteration,
            error_count: self.error_count,
            consec_errors: self.consec_errors,
            cost: self.cost,
            tokens: self.tokens,
            elapsed_minutes: self.elapsed_minutes,
            has_error: self.has_error,
        }
    }
}

/// The effect a fired action has on the session, for the executor to apply
/// (pause/resume act on `Session`, which this crate doesn't own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEffect {
    Pause,
    Resume,
    None,
}

/// `cron` triggers parse lazily and cache their gate per rule index. A
/// trigger whose cron expression fails to parse is cached as `None` and
/// never matches again — a malformed rule must not re-attempt parsing (and
/// re-log) every iteration.
pub(crate) fn trigger_matches(
    idx: usize,
    trigger: &ScheduleTrigger,
    ctx: &ScheduleContext,
    cron_gates: &mut HashMap<usize, Option<CronGate>>,
) -> bool {
    if let Some(n) = trigger.at_iteration {
        return ctx.iteration == n;
    }
    if let Some(n) = trigger.every_iterations {
        return n > 0 && ctx.iteration > 0 && ctx.iteration % n == 0;
    }
    if let Some(substring) = &trigger.on_error {
        return !substring.is_empty()
            && ctx
                .last_error
                .as_ref()
                .is_some_and(|e| e.to_lowercase().contains(&substring.to_lowercase()));
    }
    if let Some(expr) = &trigger.when {
        return ralph_whenlang::eval(expr, &ctx.facts());
    }
    if let Some(expr) = &trigger.cron {
        let gate = cron_gates
            .entry(idx)
            .or_insert_with(|| CronExpr::parse(expr).map(CronGate::new));
        return match gate {
            Some(gate) => gate.check(ctx.now),
            None => false,
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(last_error: Option<&str>) -> ScheduleContext {
        ScheduleContext {
            iteration: 1,
            error_count: 1,
            consec_errors: 1,
            cost: 0.0,
            tokens: 0,
            elapsed_minutes: 0.0,
            has_error: last_error.is_some(),
            last_error: last_error.map(str::to_string),
            now: Utc::now(),
        }
    }

    fn trigger_with(on_error: &str) -> ScheduleTrigger {
        ScheduleTrigger {
            on_error: Some(on_error.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_on_error_never_matches() {
        let trigger = trigger_with("");
        let mut gates = HashMap::new();
        assert!(!trigger_matches(0, &trigger, &ctx(Some("rate limit exceeded")), &mut gates));
        assert!(!trigger_matches(0, &trigger, &ctx(None), &mut gates));
    }

    #[test]
    fn non_empty_on_error_matches_case_insensitive_substring() {
        let trigger = trigger_with("RATE LIMIT");
        let mut gates = HashMap::new();
        assert!(trigger_matches(0, &trigger, &ctx(Some("rate limit exceeded")), &mut gates));
        assert!(!trigger_matches(0, &trigger, &ctx(Some("timeout")), &mut gates));
        assert!(!trigger_matches(0, &trigger, &ctx(None), &mut gates));
    }
}
