use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use ralph_backend::{parse_rate_limit, BackendRegistry};
use ralph_control::{ControlConfig, DispatchMode, RotationMode, ScheduleAction};
use ralph_types::{BackendResult, Event, EventType, RateLimitInfo, Request};
use ralph_whenlang::CronGate;
use tokio_util::sync::CancellationToken;

use crate::cost::CostEstimator;
use crate::error::OrchestratorError;
use crate::model_context::context_length;
use crate::schedule::{trigger_matches, ScheduleContext, ScheduleEffect};
use crate::state::BackendState;

/// What dispatching one iteration's request produced.
pub enum DispatchOutcome {
    /// One or more backends ran; carries any `model_switch`/`backend_switch`
    /// events the caller should persist alongside the turn record(s).
    Dispatched {
        results: Vec<BackendResult>,
        events: Vec<Event>,
    },
    /// Every candidate backend is currently parked. The executor should
    /// wait (cooperatively) until `next_available` and retry without
    /// advancing the iteration counter.
    AllBackendsParked { next_available: Option<DateTime<Utc>> },
}

struct Inner {
    config: Arc<ControlConfig>,
    backends: HashMap<String, BackendState>,
    rotation_order: Vec<String>,
    cursor: usize,
    last_rotation: DateTime<Utc>,
    last_used_backend: Option<String>,
    mode_override: Option<DispatchMode>,
    cron_gates: HashMap<usize, Option<CronGate>>,
}

impl Inner {
    fn effective_mode(&self) -> DispatchMode {
        self.mode_override.unwrap_or(self.config.mode)
    }

    fn allowed(&self, name: &str) -> bool {
        let list = &self.config.overrides.active_backends;
        list.is_empty() || list.iter().any(|n| n == name)
    }

    /// Rotation order, falling back to alphabetical backend-name order for
    /// any configured backend missing from the explicit list (resolves the
    /// "name appears in neither override nor rotation.order" ambiguity by
    /// alphabetical inclusion).
    fn base_order(config: &ControlConfig) -> Vec<String> {
        let mut order = config.rotation.order.clone();
        let mut known: Vec<&String> = config.backends.keys().collect();
        known.sort();
        for name in known {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order.retain(|n| config.backends.contains_key(n));
        order
    }
}

/// Per-iteration backend selection, dispatch, rolling-window threshold
/// enforcement, and schedule-rule evaluation. One rw-lock covers all
/// mutable state, matching the teacher's "one lock per related mutable
/// state" rule in its orchestrator-shaped modules.
pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    cost_estimator: StdRwLock<CostEstimator>,
    inner: StdRwLock<Inner>,
}

impl Orchestrator {
    pub fn new(registry: Arc<BackendRegistry>, config: Arc<ControlConfig>) -> Self {
        let now = Utc::now();
        let rotation_order = Inner::base_order(&config);
        let cost_estimator = CostEstimator::new(&config.cost_table);
        let inner = Inner {
            config,
            backends: HashMap::new(),
            rotation_order,
            cursor: 0,
            last_rotation: now,
            last_used_backend: None,
            mode_override: None,
            cron_gates: HashMap::new(),
        };
        Orchestrator {
            registry,
            cost_estimator: StdRwLock::new(cost_estimator),
            inner: StdRwLock::new(inner),
        }
    }

    pub fn update_config(&self, config: Arc<ControlConfig>) {
        let mut inner = self.inner.write().expect("poisoned");
        *self.cost_estimator.write().expect("poisoned") = CostEstimator::new(&config.cost_table);
        inner.rotation_order = Inner::base_order(&config);
        inner.cursor = 0;
        inner.mode_override = None;
        inner.config = config;
    }

    /// The control document currently in effect, for callers (the executor's
    /// context builder and memory trigger) that need fields this crate
    /// doesn't otherwise surface, such as `memory` and `context_processing`.
    pub fn current_config(&self) -> Arc<ControlConfig> {
        self.inner.read().expect("poisoned").config.clone()
    }

    /// Evaluate schedule rules in declaration order; the first whose
    /// trigger matches wins.
    pub fn evaluate_schedule(&self, ctx: &ScheduleContext) -> Option<ScheduleAction> {
        let mut inner = self.inner.write().expect("poisoned");
        let rules = inner.config.schedule.clone();
        for (idx, rule) in rules.iter().enumerate() {
            if trigger_matches(idx, &rule.trigger, ctx, &mut inner.cron_gates) {
                return Some(rule.action.clone());
            }
        }
        None
    }

    /// Apply a fired schedule action's effect on live orchestrator state,
    /// returning the session-level effect (if any) for the executor to
    /// apply to its `Session`.
    pub fn apply_action(&self, action: &ScheduleAction) -> ScheduleEffect {
        let mut inner = self.inner.write().expect("poisoned");
        let now = Utc::now();
        match action {
            ScheduleAction::Pause => ScheduleEffect::Pause,
            ScheduleAction::Resume => ScheduleEffect::Resume,
            ScheduleAction::SetMode { mode } => {
                let trimmed = mode.trim();
                inner.mode_override = match trimmed {
                    "sequential" => Some(DispatchMode::Sequential),
                    "parallel" => Some(DispatchMode::Parallel),
                    "round_robin" => Some(DispatchMode::RoundRobin),
                    _ => inner.mode_override,
                };
                ScheduleEffect::None
            }
            ScheduleAction::SetBackend { name } => {
                if inner.allowed(name) && inner.rotation_order.iter().any(|n| n == name) {
                    inner.rotation_order.retain(|n| n != name);
                    inner.rotation_order.insert(0, name.clone());
                    inner.cursor = 0;
                    inner.last_rotation = now;
                }
                ScheduleEffect::None
            }
            ScheduleAction::RotateBackend => {
                if !inner.rotation_order.is_empty() {
                    inner.rotation_order.rotate_left(1);
                }
                ScheduleEffect::None
            }
            ScheduleAction::NextBackend => {
                let len = inner.rotation_order.len();
                if len > 0 {
                    let current = inner
                        .last_used_backend
                        .as_ref()
                        .and_then(|b| inner.rotation_order.iter().position(|n| n == b))
                        .unwrap_or(0);
                    let next = (current + 1) % len;
                    let name = inner.rotation_order.remove(next);
                    inner.rotation_order.insert(0, name);
                }
                ScheduleEffect::None
            }
        }
    }

    /// Dispatch one iteration's request through the available candidates.
    pub async fn dispatch(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let now = Utc::now();
        let (candidates, next_available, mode) = self.select_candidates(&request, now);

        if candidates.is_empty() {
            return Ok(DispatchOutcome::AllBackendsParked { next_available });
        }

        match mode {
            DispatchMode::Parallel => self.dispatch_parallel(cancel, request, candidates).await,
            DispatchMode::Sequential | DispatchMode::RoundRobin => {
                self.dispatch_single(cancel, request, candidates).await
            }
        }
    }

    /// Candidate selection: effective order, allow-list, disabled/parked
    /// filtering, model resolution, and threshold-driven parking.
    fn select_candidates(
        &self,
        request: &Request,
        now: DateTime<Utc>,
    ) -> (Vec<(String, String)>, Option<DateTime<Utc>>, DispatchMode) {
        let mut inner = self.inner.write().expect("poisoned");
        let mode = inner.effective_mode();

        let interval = inner
            .config
            .rotation
            .interval_secs
            .map(|secs| chrono::Duration::seconds(secs as i64))
            .unwrap_or_else(chrono::Duration::zero);
        let rotation_mode = inner.config.rotation.mode;
        let order_len = inner.rotation_order.len();
        let start = match rotation_mode {
            RotationMode::None => 0,
            RotationMode::RoundRobin => {
                if order_len == 0 {
                    0
                } else {
                    let idx = inner.cursor % order_len;
                    inner.cursor = (inner.cursor + 1) % order_len;
                    idx
                }
            }
            RotationMode::TimeSliced => {
                if order_len > 0 && now - inner.last_rotation >= interval {
                    inner.last_rotation = now;
                    inner.cursor = (inner.cursor + 1) % order_len;
                }
                inner.cursor % order_len.max(1)
            }
        };

        let mut order = inner.rotation_order.clone();
        if !order.is_empty() {
            let shift = start % order.len();
            order.rotate_left(shift);
        }

        let allow = inner.allowed_snapshot();
        let cost_estimator = self.cost_estimator.read().expect("poisoned");

        let mut candidates = Vec::new();
        let mut earliest_park: Option<DateTime<Utc>> = None;

        for name in order {
            if !allow.iter().any(|n| n == &name) {
                continue;
            }
            let Some(backend_cfg) = inner.config.backends.get(&name).cloned() else {
                continue;
            };
            if !backend_cfg.enabled {
                continue;
            }

            let state = inner
                .backends
                .entry(name.clone())
                .or_insert_with(|| BackendState::new(now));
            state.wake_if_elapsed(now);
            if state.is_parked_at(now) {
                earliest_park = Some(match earliest_park {
                    Some(existing) => existing.min(state.parked_until.unwrap_or(existing)),
                    None => state.parked_until.unwrap_or(now),
                });
                continue;
            }

            let facts = ralph_whenlang::Facts {
                iteration: request.iteration,
                error_count: state.error_count,
                consec_errors: state.consec_errors,
                cost: state.cost,
                tokens: state.tokens,
                elapsed_minutes: (now - state.window_start).num_seconds() as f64 / 60.0,
                has_error: state.last_error.is_some(),
            };
            let model = backend_cfg
                .models
                .rules
                .iter()
                .find(|rule| ralph_whenlang::eval(&rule.when, &facts))
                .map(|rule| rule.model.clone())
                .or_else(|| backend_cfg.models.default.clone())
                .or_else(|| backend_cfg.options.get("model").cloned())
                .unwrap_or_default();

            let thresholds = &backend_cfg.thresholds;
            let mut parked_now = false;
            if thresholds.max_context_pct > 0 {
                let window = context_length(&model).max(1);
                let used_pct = (request.prompt.split_whitespace().count() as u64 * 100) / window;
                if used_pct > thresholds.max_context_pct as u64 {
                    state.park_for_threshold_cooldown(now);
                    parked_now = true;
                }
            }
            if !parked_now
                && thresholds.max_consecutive_errors > 0
                && state.consec_errors >= thresholds.max_consecutive_errors as u64
            {
                state.park_for_threshold_cooldown(now);
                parked_now = true;
            }
            if !parked_now
                && thresholds.max_requests_per_window > 0
                && state.requests_in_window >= thresholds.max_requests_per_window
            {
                state.park_for_window_remainder(now);
                parked_now = true;
            }
            if !parked_now
                && thresholds.max_cost_per_hour > 0.0
                && state.cost_in_window >= thresholds.max_cost_per_hour
            {
                state.park_for_window_remainder(now);
                parked_now = true;
            }

            if parked_now {
                earliest_park = Some(match earliest_park {
                    Some(existing) => existing.min(state.parked_until.unwrap_or(existing)),
                    None => state.parked_until.unwrap_or(now),
                });
                continue;
            }

            // Touch the cost estimator so an unknown model's fallback is
            // logged at selection time rather than silently at record time.
            let _ = cost_estimator.estimate(&model, 0, 0);
            candidates.push((name, model));
        }

        (candidates, earliest_park, mode)
    }

    async fn dispatch_single(
        &self,
        cancel: CancellationToken,
        request: Request,
        candidates: Vec<(String, String)>,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        for (name, model) in candidates {
            let Some(backend) = self.registry.get(&name).await else {
                continue;
            };
            let mut req = request.clone();
            req.model = model.clone();
            let outcome = backend.execute(cancel.clone(), req).await;
            match outcome {
                Ok(result) => {
                    let rate_limit = detect_rate_limit(&result);
                    let events = self.record_backend_result(
                        &request.session_id,
                        request.iteration,
                        &name,
                        &model,
                        &result,
                        rate_limit.as_ref(),
                    );
                    if rate_limit.is_some() {
                        continue;
                    }
                    return Ok(DispatchOutcome::Dispatched {
                        results: vec![result],
                        events,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    let events =
                        self.record_error(&request.session_id, request.iteration, &name, message.clone());
                    return Ok(DispatchOutcome::Dispatched {
                        results: vec![BackendResult {
                            backend: name,
                            model,
                            error: Some(message),
                            ..Default::default()
                        }],
                        events,
                    });
                }
            }
        }
        let next_available = self.inner.read().expect("poisoned").earliest_parked(Utc::now());
        Ok(DispatchOutcome::AllBackendsParked { next_available })
    }

    async fn dispatch_parallel(
        &self,
        cancel: CancellationToken,
        request: Request,
        candidates: Vec<(String, String)>,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let mut tasks = Vec::with_capacity(candidates.len());
        for (name, model) in candidates {
            let Some(backend) = self.registry.get(&name).await else {
                continue;
            };
            let mut req = request.clone();
            req.model = model.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let result = backend.execute(cancel, req).await;
                (name, model, result)
            }));
        }

        let joined = futures::future::join_all(tasks).await;
        let mut results = Vec::new();
        let mut events = Vec::new();
        let mut any_success = false;

        for joined in joined {
            let Ok((name, model, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(result) => {
                    let rate_limit = detect_rate_limit(&result);
                    let is_error = result.is_error();
                    events.extend(self.record_backend_result(
                        &request.session_id,
                        request.iteration,
                        &name,
                        &model,
                        &result,
                        rate_limit.as_ref(),
                    ));
                    if !is_error {
                        any_success = true;
                    }
                    results.push(result);
                }
                Err(e) => {
                    let message = e.to_string();
                    events.extend(self.record_error(
                        &request.session_id,
                        request.iteration,
                        &name,
                        message.clone(),
                    ));
                    results.push(BackendResult {
                        backend: name,
                        model,
                        error: Some(message),
                        ..Default::default()
                    });
                }
            }
        }

        if results.len() > 1 {
            events.push(
                Event::new(request.session_id.clone(), request.iteration, EventType::BackendComparison)
                    .with_data(serde_json::json!({ "count": results.len() })),
            );
        }

        if !any_success && !results.is_empty() {
            return Err(OrchestratorError::AllFailed(format!(
                "all {} candidates failed",
                results.len()
            )));
        }

        Ok(DispatchOutcome::Dispatched { results, events })
    }

    fn record_backend_result(
        &self,
        session_id: &str,
        iteration: u64,
        name: &str,
        model: &str,
        result: &BackendResult,
        rate_limit: Option<&RateLimitInfo>,
    ) -> Vec<Event> {
        let now = Utc::now();
        let mut inner = self.inner.write().expect("poisoned");
        let mut events = Vec::new();

        let backend_switched = inner.last_used_backend.as_deref() != Some(name);

        let state = inner
            .backends
            .entry(name.to_string())
            .or_insert_with(|| BackendState::new(now));

        let model_switched = state.last_model.as_deref().is_some_and(|m| m != model);

        if let Some(info) = rate_limit {
            let duration = chrono::Duration::from_std(info.resolve_park_duration(now))
                .unwrap_or_else(|_| chrono::Duration::zero());
            state.park_for(duration, now);
            state.record_error(format!("rate limited: {}", info.pattern), now);
        } else if result.is_error() {
            state.record_error(result.error.clone().unwrap_or_default(), now);
        } else {
            let cost = if result.cost > 0.0 {
                result.cost
            } else {
                result.cost_estimate
            };
            state.record_success(model, result.tokens_in + result.tokens_out, cost, now);
        }

        if model_switched {
            events.push(
                Event::new(session_id, iteration, EventType::ModelSwitch)
                    .with_data(serde_json::json!({ "backend": name, "model": model })),
            );
        }
        if backend_switched {
            events.push(
                Event::new(session_id, iteration, EventType::BackendSwitch)
                    .with_data(serde_json::json!({ "backend": name })),
            );
            inner.last_used_backend = Some(name.to_string());
        }

        events
    }

    fn record_error(&self, session_id: &str, iteration: u64, name: &str, message: String) -> Vec<Event> {
        let now = Utc::now();
        let mut inner = self.inner.write().expect("poisoned");
        let backend_switched = inner.last_used_backend.as_deref() != Some(name);
        let state = inner
            .backends
            .entry(name.to_string())
            .or_insert_with(|| BackendState::new(now));
        state.record_error(message, now);

        let mut events = Vec::new();
        if backend_switched {
            events.push(
                Event::new(session_id, iteration, EventType::BackendSwitch)
                    .with_data(serde_json::json!({ "backend": name })),
            );
            inner.last_used_backend = Some(name.to_string());
        }
        events
    }
}

impl Inner {
    fn allowed_snapshot(&self) -> Vec<String> {
        if self.config.overrides.active_backends.is_empty() {
            self.config.backends.keys().cloned().collect()
        } else {
            self.config.overrides.active_backends.clone()
        }
    }

    fn earliest_parked(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.backends
            .values()
            .filter(|s| s.is_parked_at(now))
            .filter_map(|s| s.parked_until)
            .min()
    }
}

fn detect_rate_limit(result: &BackendResult) -> Option<RateLimitInfo> {
    let text = format!("{} {}", result.output, result.error.clone().unwrap_or_default());
    parse_rate_limit(&text, &HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_backend::MockBackend;
    use ralph_control::BackendConfig;

    fn config_with(names: &[&str]) -> ControlConfig {
        let mut cfg = ControlConfig::default();
        for name in names {
            cfg.backends.insert(
                name.to_string(),
                BackendConfig {
                    command: Some(name.to_string()),
                    ..Default::default()
                },
            );
        }
        cfg
    }

    fn request() -> Request {
        Request {
            prompt: "do something".into(),
            model: "m".into(),
            sandbox_path: "/tmp".into(),
            iteration: 1,
            session_id: "s1".into(),
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn sequential_dispatch_returns_first_success() {
        let registry = Arc::new(BackendRegistry::new());
        let mock = Arc::new(MockBackend::new("alpha", "m"));
        mock.push_result(BackendResult {
            backend: "alpha".into(),
            output: "ok".into(),
            ..Default::default()
        });
        registry.register(mock).await;

        let orch = Orchestrator::new(registry, Arc::new(config_with(&["alpha"])));
        let outcome = orch.dispatch(CancellationToken::new(), request()).await.unwrap();
        match outcome {
            DispatchOutcome::Dispatched { results, .. } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].output, "ok");
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[tokio::test]
    async fn rate_limited_candidate_falls_through_to_next() {
        let registry = Arc::new(BackendRegistry::new());
        let limited = Arc::new(MockBackend::new("alpha", "m"));
        limited.push_result(BackendResult {
            backend: "alpha".into(),
            output: "rate limit exceeded".into(),
            ..Default::default()
        });
        let healthy = Arc::new(MockBackend::new("beta", "m"));
        healthy.push_result(BackendResult {
            backend: "beta".into(),
            output: "ok".into(),
            ..Default::default()
        });
        registry.register(limited).await;
        registry.register(healthy).await;

        let mut cfg = config_with(&["alpha", "beta"]);
        cfg.rotation.order = vec!["alpha".to_string(), "beta".to_string()];
        let orch = Orchestrator::new(registry, Arc::new(cfg));
        let outcome = orch.dispatch(CancellationToken::new(), request()).await.unwrap();
        match outcome {
            DispatchOutcome::Dispatched { results, .. } => {
                assert_eq!(results[0].backend, "beta");
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[tokio::test]
    async fn all_parked_returns_hint() {
        let registry = Arc::new(BackendRegistry::new());
        let mut cfg = config_with(&["alpha"]);
        cfg.backends.get_mut("alpha").unwrap().enabled = false;
        let orch = Orchestrator::new(registry, Arc::new(cfg));
        let outcome = orch.dispatch(CancellationToken::new(), request()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::AllBackendsParked { .. }));
    }

    #[test]
    fn at_iteration_trigger_fires_exactly_once() {
        let registry = Arc::new(BackendRegistry::new());
        let mut cfg = config_with(&["alpha"]);
        cfg.schedule.push(ralph_control::ScheduleRule {
            trigger: ralph_control::ScheduleTrigger {
                at_iteration: Some(5),
                ..Default::default()
            },
            action: ScheduleAction::Pause,
        });
        let orch = Orchestrator::new(registry, Arc::new(cfg));
        let ctx = |iteration| ScheduleContext {
            iteration,
            error_count: 0,
            consec_errors: 0,
            cost: 0.0,
            tokens: 0,
            elapsed_minutes: 0.0,
            has_error: false,
            last_error: None,
            now: Utc::now(),
        };
        assert!(orch.evaluate_schedule(&ctx(4)).is_none());
        assert!(matches!(orch.evaluate_schedule(&ctx(5)), Some(ScheduleAction::Pause)));
        assert!(orch.evaluate_schedule(&ctx(6)).is_none());
    }
}
