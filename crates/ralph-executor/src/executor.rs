//! The per-session iteration loop: the single place that reloads the
//! prompt, builds the context-augmented request, consults the schedule,
//! dispatches through the orchestrator, and records what happened.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use ralph_memory::MemoryStore;
use ralph_orchestrator::{DispatchOutcome, Orchestrator, ScheduleContext, ScheduleEffect};
use ralph_types::{
    BackendResult, Event, EventType, Request, Session, SessionState, TurnRecord,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::context;
use crate::error::ExecutorError;

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Produces a [`ralph_types::SessionSummary`] from a contiguous run of raw
/// turns. The real implementation (an LLM call over recent history) is a
/// collaborator this crate doesn't own; `Executor` only owns the trigger,
/// persistence, and retention pruning around it.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(
        &self,
        session_id: &str,
        turns: &[TurnRecord],
    ) -> ralph_types::SessionSummary;
}

/// Why the iteration loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations_run: u64,
    pub stop_reason: StopReason,
}

/// Drives one [`Session`] to completion against one [`Orchestrator`].
pub struct Executor {
    orchestrator: Arc<Orchestrator>,
    memory: Option<Arc<MemoryStore>>,
    summary_generator: Option<Arc<dyn SummaryGenerator>>,
}

impl Executor {
    pub fn new(orchestrator: Arc<Orchestrator>, memory: Option<Arc<MemoryStore>>) -> Self {
        Executor {
            orchestrator,
            memory,
            summary_generator: None,
        }
    }

    pub fn with_summary_generator(mut self, generator: Arc<dyn SummaryGenerator>) -> Self {
        self.summary_generator = Some(generator);
        self
    }

    /// Run the iteration loop until cancellation, exhaustion of
    /// `max_iterations`, or expiry of `overall_timeout`. The session is
    /// transitioned `Running` on entry and `Completed` on exit.
    pub async fn run(
        &self,
        session: &mut Session,
        cancel: CancellationToken,
    ) -> Result<RunSummary, ExecutorError> {
        session.transition(SessionState::Running)?;

        let timeout_task = session.config.overall_timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            })
        });

        let mut prompt_mtime = session
            .config
            .prompt_file
            .as_ref()
            .and_then(|path| std::fs::metadata(path).ok())
            .and_then(|meta| meta.modified().ok());

        let mut error_count = 0u64;
        let mut consec_errors = 0u64;
        let mut last_error: Option<String> = None;
        let mut iterations_run = 0u64;

        let stop_reason = 'outer: loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if session.exhausted() {
                break StopReason::Exhausted;
            }

            while session.state() == SessionState::Paused {
                tokio::select! {
                    _ = tokio::time::sleep(PAUSE_POLL_INTERVAL) => {}
                    _ = cancel.cancelled() => break 'outer StopReason::Cancelled,
                }
                let ctx = self.schedule_context(
                    session,
                    session.iteration,
                    false,
                    error_count,
                    consec_errors,
                    last_error.clone(),
                );
                if let Some(action) = self.orchestrator.evaluate_schedule(&ctx) {
                    self.apply_schedule_effect(session, &action, session.iteration)
                        .await?;
                }
            }

            let iteration = session.next_iteration();
            iterations_run += 1;

            if let Some(event) = self.reload_prompt_if_changed(session, &mut prompt_mtime, iteration) {
                if let Some(memory) = &self.memory {
                    memory.save_event(&event).await?;
                }
            }

            let config = self.orchestrator.current_config();
            let prompt = self.build_prompt(session, &config, iteration).await;

            let schedule_ctx = self.schedule_context(
                session,
                iteration,
                last_error.is_some() && consec_errors > 0,
                error_count,
                consec_errors,
                last_error.clone(),
            );
            if let Some(action) = self.orchestrator.evaluate_schedule(&schedule_ctx) {
                self.apply_schedule_effect(session, &action, iteration).await?;
            }

            let request = Request {
                prompt: prompt.clone(),
                model: String::new(),
                sandbox_path: session.config.sandbox_path.display().to_string(),
                iteration,
                session_id: session.id.clone(),
                context: Default::default(),
            };

            // Retry this same iteration number (without advancing it again)
            // until something other than "every candidate is parked" comes
            // back, so a full-fleet park never consumes progress.
            let results = loop {
                let outcome = self
                    .orchestrator
                    .dispatch(cancel.clone(), request.clone())
                    .await?;
                match outcome {
                    DispatchOutcome::Dispatched { results, events } => {
                        if let Some(memory) = &self.memory {
                            for event in &events {
                                memory.save_event(event).await?;
                            }
                        }
                        break results;
                    }
                    DispatchOutcome::AllBackendsParked { next_available } => {
                        let wait = next_available
                            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::from_secs(1)))
                            .unwrap_or(Duration::from_secs(1));
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = cancel.cancelled() => break 'outer StopReason::Cancelled,
                        }
                    }
                }
            };

            self.record_results(
                session,
                &config,
                iteration,
                &prompt,
                results,
                &mut error_count,
                &mut consec_errors,
                &mut last_error,
            )
            .await?;

            self.maybe_summarize(session, &config, iteration).await?;
        };

        session.complete()?;
        if let Some(task) = timeout_task {
            task.abort();
        }

        Ok(RunSummary {
            iterations_run,
            stop_reason,
        })
    }

    fn reload_prompt_if_changed(
        &self,
        session: &mut Session,
        last_mtime: &mut Option<SystemTime>,
        iteration: u64,
    ) -> Option<Event> {
        let path = session.config.prompt_file.clone()?;
        let mtime = std::fs::metadata(&path).ok()?.modified().ok()?;
        if last_mtime.is_some_and(|prev| mtime <= prev) {
            return None;
        }
        *last_mtime = Some(mtime);
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                session.config.prompt = contents;
                Some(Event::new(session.id.clone(), iteration, EventType::PromptReload))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to reload prompt file");
                None
            }
        }
    }

    async fn build_prompt(
        &self,
        session: &Session,
        config: &ralph_control::ControlConfig,
        iteration: u64,
    ) -> String {
        let cp = &config.context_processing;
        if !cp.enabled {
            return session.config.prompt.clone();
        }

        let model = cp.model.as_deref().unwrap_or("");
        let budget = context::compute_budget(model, cp.budget_pct, cp.max_output_tokens);

        let recent_summaries = if config.memory.enabled {
            match &self.memory {
                Some(memory) => match memory.list_summaries(&session.id, None, 3).await {
                    Ok(mut summaries) => {
                        summaries.reverse();
                        summaries
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to load recent summaries for context");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let static_text = context::read_static_project_text(&session.config.sandbox_path);
        let block = context::build_context_block(iteration, budget, &recent_summaries, static_text.as_deref());
        context::wrap_prompt(&session.config.prompt, &block)
    }

    fn schedule_context(
        &self,
        session: &Session,
        iteration: u64,
        has_error: bool,
        error_count: u64,
        consec_errors: u64,
        last_error: Option<String>,
    ) -> ScheduleContext {
        ScheduleContext {
            iteration,
            error_count,
            consec_errors,
            cost: session.total_cost,
            tokens: session.total_tokens,
            elapsed_minutes: session.elapsed().as_secs_f64() / 60.0,
            has_error,
            last_error,
            now: Utc::now(),
        }
    }

    async fn apply_schedule_effect(
        &self,
        session: &mut Session,
        action: &ralph_control::ScheduleAction,
        iteration: u64,
    ) -> Result<(), ExecutorError> {
        let effect = self.orchestrator.apply_action(action);
        match effect {
            ScheduleEffect::Pause => {
                let _ = session.pause();
            }
            ScheduleEffect::Resume => {
                let _ = session.resume();
            }
            ScheduleEffect::None => {}
        }
        if let Some(memory) = &self.memory {
            let event = Event::new(session.id.clone(), iteration, EventType::ScheduleAction)
                .with_data(json!({ "action": action }));
            memory.save_event(&event).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_results(
        &self,
        session: &mut Session,
        config: &ralph_control::ControlConfig,
        iteration: u64,
        prompt: &str,
        results: Vec<BackendResult>,
        error_count: &mut u64,
        consec_errors: &mut u64,
        last_error: &mut Option<String>,
    ) -> Result<(), ExecutorError> {
        let cost_estimator = ralph_orchestrator::CostEstimator::new(&config.cost_table);

        for result in results {
            let tokens_in = if result.tokens_in == 0 {
                context::estimate_tokens(prompt)
            } else {
                result.tokens_in
            };
            let tokens_out = if result.tokens_out == 0 && !result.output.is_empty() {
                context::estimate_tokens(&result.output)
            } else {
                result.tokens_out
            };
            let cost = if result.cost > 0.0 {
                result.cost
            } else if result.cost_estimate > 0.0 {
                result.cost_estimate
            } else {
                cost_estimator.estimate(&result.model, tokens_in, tokens_out)
            };

            session.credit(tokens_in + tokens_out, cost);
            for file in &result.files_changed {
                session.record_modified_file(file.clone());
            }

            if result.is_error() {
                *error_count += 1;
                *consec_errors += 1;
                *last_error = result.error.clone();
            } else {
                *consec_errors = 0;
            }

            let turn = TurnRecord {
                id: None,
                session_id: session.id.clone(),
                iteration,
                timestamp: Utc::now(),
                prompt: prompt.to_string(),
                response: result.output.clone(),
                backend: result.backend.clone(),
                model: result.model.clone(),
                tokens_in,
                tokens_out,
                cost,
                error: result.error.clone(),
            };

            if let Some(memory) = &self.memory {
                memory.save_turn(&turn).await?;
                for file in &result.files_changed {
                    let event = Event::new(session.id.clone(), iteration, EventType::FileChange)
                        .with_file_path(file.clone());
                    memory.save_event(&event).await?;
                }
                if let Some(message) = &result.error {
                    let event = Event::new(session.id.clone(), iteration, EventType::Error)
                        .with_error(true)
                        .with_data(json!({ "backend": result.backend, "message": message }));
                    memory.save_event(&event).await?;
                }
            }
        }

        Ok(())
    }

    async fn maybe_summarize(
        &self,
        session: &Session,
        config: &ralph_control::ControlConfig,
        iteration: u64,
    ) -> Result<(), ExecutorError> {
        if !config.memory.enabled {
            return Ok(());
        }
        let interval = config.memory.summary_interval as u64;
        if interval == 0 || iteration % interval != 0 {
            return Ok(());
        }
        let Some(memory) = &self.memory else {
            return Ok(());
        };

        let start = iteration.saturating_sub(interval - 1).max(1);
        let turns = memory.get_turns_in_range(&session.id, start, iteration).await?;

        if let Some(generator) = &self.summary_generator {
            if !turns.is_empty() {
                let summary = generator.summarize(&session.id, &turns).await;
                memory.save_summary(&summary).await?;
            }
        }

        memory.prune_retention(config.memory.retention_days).await?;
        Ok(())
    }
}
