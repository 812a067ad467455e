//! Error types for Stevedore

use thiserror::Error;

/// Result type for Stevedore operations
pub type Result<T> = std::result::Result<T, StevedoreError>;

/// Stevedore error types
#[derive(Error, Debug)]
pub enum StevedoreError {
    #[error("Cluster definition parse error: {0}")]
    ClusterParse(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load image {image}: {message}")]
    ImageLoad { image: String, message: String },

    #[error("Start timeout: container {0} was not observed running")]
    StartTimeout(String),

    #[error("Exit {code}: {command}")]
    CommandExit { code: i32, command: String },

    #[error("Unreadable exit code marker {path}: {reason}")]
    ExitMarker { path: String, reason: String },

    #[error("{command} failed: {message}")]
    Driver { command: String, message: String },

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
