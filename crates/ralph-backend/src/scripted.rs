use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use ralph_types::{BackendResult, Request};
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::trait_def::Backend;

/// The integration seam for a real external-process backend: a
/// pre-built `BackendResult` script consumed in order. Exists so a process
/// spawning implementation (out of scope here) is a drop-in replacement —
/// it implements the same [`Backend`] trait and nothing about the
/// orchestrator needs to change.
pub struct ScriptedBackend {
    name: String,
    script: Vec<BackendResult>,
    cursor: AtomicUsize,
    available: AtomicBool,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>, script: Vec<BackendResult>) -> Self {
        ScriptedBackend {
            name: name.into(),
            script,
            cursor: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        _request: Request,
    ) -> Result<BackendResult, BackendError> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .get(idx)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_default();
        Ok(result)
    }

    fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_script_in_order_then_holds_last() {
        let backend = ScriptedBackend::new(
            "scripted",
            vec![
                BackendResult { output: "one".into(), ..Default::default() },
                BackendResult { output: "two".into(), ..Default::default() },
            ],
        );
        let request = Request {
            prompt: "p".into(),
            model: "m".into(),
            sandbox_path: "/tmp".into(),
            iteration: 0,
            session_id: "s".into(),
            context: Default::default(),
        };
        let r1 = backend.execute(CancellationToken::new(), request.clone()).await.unwrap();
        let r2 = backend.execute(CancellationToken::new(), request.clone()).await.unwrap();
        let r3 = backend.execute(CancellationToken::new(), request).await.unwrap();
        assert_eq!(r1.output, "one");
        assert_eq!(r2.output, "two");
        assert_eq!(r3.output, "two");
    }
}
