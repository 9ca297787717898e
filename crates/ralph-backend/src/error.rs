use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend '{0}' not found")]
    NotFound(String),

    #[error("backend '{backend}' exited with a non-zero status: {detail}")]
    NonZeroExit { backend: String, detail: String },

    #[error("backend '{backend}' I/O error: {source}")]
    Io {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend execution cancelled")]
    Cancelled,
}
