//! Error types for glucosync

use thiserror::Error;

/// Result type alias for glucosync operations
pub type Result<T> = std::result::Result<T, GlucoError>;

/// Main error type for glucosync
#[derive(Error, Debug)]
pub enum GlucoError {
    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error("Invalid source file: {0}")]
    SourceFormat(String),

    #[error("Remote source reports data from before {min_year}, refusing to sync")]
    HistoryExhausted { min_year: i32 },

    #[error("Remote request failed: {0}")]
    RemoteRequest(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GlucoError {
    pub fn source_format(msg: impl Into<String>) -> Self {
        Self::SourceFormat(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteRequest(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
