//! Error types for the experiment sweep engine

use thiserror::Error;

/// Main error type for sweep operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint save/load error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Resource exhausted (disk space below the required threshold)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Rerun planning error
    #[error("Rerun planning error: {0}")]
    Rerun(String),

    /// Training unit failure reported by the training subsystem
    #[error("Training error: {0}")]
    Training(String),

    /// Experiment tracking error
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Checkpoint encoding error
    #[error("Checkpoint encoding error: {0}")]
    Encode(#[from] bincode::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for sweep operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a resource-exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a rerun planning error
    pub fn rerun(msg: impl Into<String>) -> Self {
        Self::Rerun(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Create a tracking error
    pub fn tracking(msg: impl Into<String>) -> Self {
        Self::Tracking(msg.into())
    }
}
