use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlConfigError {
    #[error("failed to read control document at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse control document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid control document: {0}")]
    Validation(String),
}
