//! Error types for the inference bridge.
//!
//! Backend and catalog errors never cross the adapter boundary: adapters
//! flatten them into the response `error` field or an empty model list.

/// Error types for bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    #[error("Backend communication error: {0}")]
    Communication(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Model not loaded: {0}")]
    LoadFailed(String),

    #[error("Pull failed: {0}")]
    PullFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Communication(format!("request timed out: {}", e))
        } else {
            Error::Communication(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Communication(format!("malformed response: {}", e))
    }
}

impl Error {
    /// Text placed in a response `error` field.
    ///
    /// Backend-reported inference failures keep the backend's own wording.
    pub fn response_message(&self) -> String {
        match self {
            Error::InferenceFailed(detail) => detail.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
