//! Per-backend mutable state the orchestrator tracks across iterations.
//! Created lazily, keyed by backend name. Never exposed outside this crate
//! except through aggregated `BackendStats`.

use chrono::{DateTime, Utc};

const WINDOW: chrono::Duration = chrono::Duration::hours(1);
const THRESHOLD_COOLDOWN: chrono::Duration = chrono::Duration::minutes(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Active,
    Parked,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct BackendState {
    pub status: BackendStatus,
    pub parked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u64,
    pub consec_errors: u64,
    pub tokens: u64,
    pub cost: f64,
    pub window_start: DateTime<Utc>,
    pub requests_in_window: u32,
    pub cost_in_window: f64,
    pub window_reset: Option<DateTime<Utc>>,
    pub last_model: Option<String>,
}

impl BackendState {
    pub fn new(now: DateTime<Utc>) -> Self {
        BackendState {
            status: BackendStatus::Active,
            parked_until: None,
            last_error: None,
            error_count: 0,
            consec_errors: 0,
            tokens: 0,
            cost: 0.0,
            window_start: now,
            requests_in_window: 0,
            cost_in_window: 0.0,
            window_reset: None,
            last_model: None,
        }
    }

    pub fn is_parked_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BackendStatus::Parked)
            && self.parked_until.is_some_and(|until| until > now)
    }

    /// Wake a backend whose park window has elapsed.
    pub fn wake_if_elapsed(&mut self, now: DateTime<Utc>) {
        if self.status == BackendStatus::Parked {
            if let Some(until) = self.parked_until {
                if now >= until {
                    self.status = BackendStatus::Active;
                    self.parked_until = None;
                }
            }
        }
    }

    /// Refresh the rolling 1-hour window if a full window has elapsed or an
    /// explicit reset hint was set by a parsed rate-limit response.
    pub fn refresh_window(&mut self, now: DateTime<Utc>) {
        let elapsed = now - self.window_start;
        let reset_due = self.window_reset.is_some_and(|r| now >= r);
        if elapsed >= WINDOW || reset_due {
            self.window_start = now;
            self.requests_in_window = 0;
            self.cost_in_window = 0.0;
            self.window_reset = None;
        }
    }

    pub fn park_for(&mut self, duration: chrono::Duration, now: DateTime<Utc>) {
        self.status = BackendStatus::Parked;
        self.parked_until = Some(now + duration);
    }

    pub fn park_for_threshold_cooldown(&mut self, now: DateTime<Utc>) {
        self.park_for(THRESHOLD_COOLDOWN, now);
    }

    /// Park for the remainder of the current rolling window.
    pub fn park_for_window_remainder(&mut self, now: DateTime<Utc>) {
        let remainder = (self.window_start + WINDOW) - now;
        self.park_for(remainder.max(chrono::Duration::zero()), now);
    }

    pub fn record_success(&mut self, model: &str, tokens: u64, cost: f64, now: DateTime<Utc>) {
        self.refresh_window(now);
        self.requests_in_window += 1;
        self.cost_in_window += cost;
        self.tokens += tokens;
        self.cost += cost;
        self.consec_errors = 0;
        self.last_model = Some(model.to_string());
    }

    pub fn record_error(&mut self, message: String, now: DateTime<Utc>) {
        self.refresh_window(now);
        self.requests_in_window += 1;
        self.error_count += 1;
        self.consec_errors += 1;
        self.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakes_after_park_window_elapses() {
        let now = Utc::now();
        let mut state = BackendState::new(now);
        state.park_for(chrono::Duration::seconds(10), now);
        assert!(state.is_parked_at(now));
        state.wake_if_elapsed(now + chrono::Duration::seconds(11));
        assert_eq!(state.status, BackendStatus::Active);
    }

    #[test]
    fn window_refreshes_after_an_hour() {
        let now = Utc::now();
        let mut state = BackendState::new(now);
        state.record_success("m", 100, 1.0, now);
        assert_eq!(state.requests_in_window, 1);
        state.refresh_window(now + chrono::Duration::hours(2));
        assert_eq!(state.requests_in_window, 0);
    }
}
