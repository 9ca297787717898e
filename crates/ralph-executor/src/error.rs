use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("session error: {0}")]
    Session(#[from] ralph_types::SessionError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] ralph_orchestrator::OrchestratorError),

    #[error("memory error: {0}")]
    Memory(#[from] ralph_memory::MemoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
