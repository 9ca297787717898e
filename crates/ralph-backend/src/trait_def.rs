use async_trait::async_trait;
use ralph_types::{BackendResult, Request};
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;

/// The capability the orchestrator expects from a dispatch target, grounded
/// on the teacher's `Provider` trait: a name, a way to run a request, and a
/// liveness check.
///
/// A `Backend` MAY embed a failure into `BackendResult.error` and still
/// return `Ok`, or return `Err` directly — the orchestrator treats both
/// channels equivalently.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<BackendResult, BackendError>;

    fn available(&self) -> bool;
}
