use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnricherError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV processing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("pipeline deadline of {deadline_secs}s elapsed before the run drained ({exported} items flushed)")]
    Timeout { deadline_secs: u64, exported: u64 },
}

pub type Result<T> = std::result::Result<T, EnricherError>;

/// Per-item failure classification. Item errors never cross a stage boundary
/// as `Err`; the stage runtime folds them into a `StageResult`.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("transient failure from {service}: {message}")]
    Transient {
        service: &'static str,
        message: String,
    },

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl ItemError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        ItemError::Transient {
            service,
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        ItemError::Malformed(reason.into())
    }

    /// Fatal errors drop the item; transient ones are eligible for fallback.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ItemError::Malformed(_))
    }
}
