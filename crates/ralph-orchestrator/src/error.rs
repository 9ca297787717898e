use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no backend named '{0}' is configured")]
    UnknownBackend(String),

    #[error("all candidate backends failed: {0}")]
    AllFailed(String),

    #[error("backend dispatch error: {0}")]
    Backend(#[from] ralph_backend::BackendError),
}
