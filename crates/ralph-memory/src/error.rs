use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid memory store configuration: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;
