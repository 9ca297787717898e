use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use ralph_types::{BackendResult, Request};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::trait_def::Backend;

/// A deterministic, canned-response backend used by tests and demos.
/// Responses are consumed front-to-back; once exhausted, a fixed default
/// result (echoing the request) is returned forever.
pub struct MockBackend {
    name: String,
    model: String,
    queue: Mutex<VecDeque<BackendResult>>,
    available: std::sync::atomic::AtomicBool,
}

impl MockBackend {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        MockBackend {
            name: name.into(),
            model: model.into(),
            queue: Mutex::new(VecDeque::new()),
            available: std::sync::atomic::AtomicBool::new(true),
        }
    }

    /// Queue a canned result to be returned on a future `execute` call.
    pub fn push_result(&self, result: BackendResult) {
        self.queue.try_lock().expect("uncontended in tests").push_back(result);
    }

    pub fn set_available(&self, available: bool) {
        self.available
            .store(available, std::sync::atomic::Ordering::SeqCst);
    }

    fn default_result(&self, request: &Request) -> BackendResult {
        BackendResult {
            backend: self.name.clone(),
            model: self.model.clone(),
            duration: Duration::from_millis(1),
            tokens_in: request.prompt.split_whitespace().count() as u64,
            tokens_out: 0,
            cost: 0.0,
            cost_estimate: 0.0,
            files_changed: Vec::new(),
            tests_passed: None,
            tests_failed: None,
            output: format!("mock response to iteration {}", request.iteration),
            error: None,
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        request: Request,
    ) -> Result<BackendResult, BackendError> {
        let queued = self.queue.lock().await.pop_front();
        Ok(queued.unwrap_or_else(|| self.default_result(&request)))
    }

    fn available(&self) -> bool {
        self.available.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_queued_results_in_order() {
        let backend = MockBackend::new("mock", "mock-model");
        backend.push_result(BackendResult {
            output: "first".into(),
            ..Default::default()
        });
        backend.push_result(BackendResult {
            output: "second".into(),
            ..Default::default()
        });

        let request = Request {
            prompt: "hi".into(),
            model: "mock-model".into(),
            sandbox_path: "/tmp".into(),
            iteration: 1,
            session_id: "s1".into(),
            context: Default::default(),
        };

        let first = backend
            .execute(CancellationToken::new(), request.clone())
            .await
            .unwrap();
        assert_eq!(first.output, "first");
        let second = backend.execute(CancellationToken::new(), request.clone()).await.unwrap();
        assert_eq!(second.output, "second");
        let third = backend.execute(CancellationToken::new(), request).await.unwrap();
        assert!(third.output.contains("mock response"));
    }

    #[tokio::test]
    async fn availability_is_settable() {
        let backend = MockBackend::new("mock", "mock-model");
        assert!(backend.available());
        backend.set_available(false);
        assert!(!backend.available());
    }
}
