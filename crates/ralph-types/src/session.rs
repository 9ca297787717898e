//! Session identity, config, counters, and lifecycle state machine.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states a [`Session`] moves through.
///
/// `Init -> {Refining, Running}`, `Refining -> {Running, Completed}`,
/// `Running <-> Paused`, `Running/Paused -> Completed`. `Completed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Refining,
    Running,
    Paused,
    Completed,
}

impl SessionState {
    fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Init, Refining)
                | (Init, Running)
                | (Refining, Running)
                | (Refining, Completed)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Paused, Completed)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid session state transition from {from:?} to {to:?}")]
pub struct SessionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// Immutable configuration a [`Session`] is created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub prompt: String,
    pub prompt_file: Option<std::path::PathBuf>,
    pub sandbox_path: std::path::PathBuf,
    pub overall_timeout: Option<Duration>,
    pub max_iterations: Option<u64>,
}

/// An iteration driver session: identity, immutable config, and the mutable
/// counters the executor updates every iteration.
///
/// All mutation goes through `&mut self` methods so a caller serializes
/// access with a single lock (typically `tokio::sync::Mutex<Session>`),
/// matching the "one lock per related mutable state" rule the rest of this
/// codebase follows.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub config: SessionConfig,
    state: SessionState,
    pub iteration: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub started_at: Instant,
    pub modified_files: Vec<String>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            state: SessionState::Init,
            iteration: 0,
            total_tokens: 0,
            total_cost: 0.0,
            started_at: Instant::now(),
            modified_files: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, target: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError {
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Paused)
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Running)
    }

    pub fn complete(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Advance the iteration counter. Monotonically non-decreasing by
    /// construction: this is the only place `iteration` is mutated.
    pub fn next_iteration(&mut self) -> u64 {
        self.iteration += 1;
        self.iteration
    }

    pub fn credit(&mut self, tokens: u64, cost: f64) {
        self.total_tokens += tokens;
        self.total_cost += cost;
    }

    pub fn record_modified_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.modified_files.contains(&path) {
            self.modified_files.push(path);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// `true` once the overall timeout or max-iteration budget is exhausted.
    pub fn exhausted(&self) -> bool {
        if let Some(max) = self.config.max_iterations {
            if self.iteration >= max {
                return true;
            }
        }
        if let Some(timeout) = self.config.overall_timeout {
            if self.elapsed() >= timeout {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            prompt: "do the thing".into(),
            prompt_file: None,
            sandbox_path: std::path::PathBuf::from("/tmp/sandbox"),
            overall_timeout: None,
            max_iterations: None,
        }
    }

    #[test]
    fn pause_then_resume_returns_to_running() {
        let mut session = Session::new(config());
        session.transition(SessionState::Running).unwrap();
        session.pause().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn completed_is_terminal() {
        let mut session = Session::new(config());
        session.transition(SessionState::Running).unwrap();
        session.complete().unwrap();
        assert!(session.is_terminal());
        let err = session.transition(SessionState::Running).unwrap_err();
        assert_eq!(err.from, SessionState::Completed);
        assert_eq!(err.to, SessionState::Running);
    }

    #[test]
    fn refining_may_complete_directly() {
        let mut session = Session::new(config());
        session.transition(SessionState::Refining).unwrap();
        session.transition(SessionState::Completed).unwrap();
        assert!(session.is_terminal());
    }

    #[test]
    fn iteration_counter_is_monotonic() {
        let mut session = Session::new(config());
        assert_eq!(session.next_iteration(), 1);
        assert_eq!(session.next_iteration(), 2);
        assert_eq!(session.iteration, 2);
    }

    #[test]
    fn credit_accumulates_totals() {
        let mut session = Session::new(config());
        session.credit(100, 0.05);
        session.credit(50, 0.01);
        assert_eq!(session.total_tokens, 150);
        assert!((session.total_cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn exhausted_respects_max_iterations() {
        let mut cfg = config();
        cfg.max_iterations = Some(2);
        let mut session = Session::new(cfg);
        assert!(!session.exhausted());
        session.next_iteration();
        session.next_iteration();
        assert!(session.exhausted());
    }
}
