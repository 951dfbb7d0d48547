// src/utils/errors.rs
//! Error types for the session recording agent
//!
//! None of these ever reach the embedding page: every public entry point
//! either recovers locally or reports the failure through `tracing`.

use thiserror::Error;

/// Errors that can occur inside the agent
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Settings fetch failed: {0}")]
    SettingsFetchFailed(String),

    #[error("Transport failure: {0}")]
    TransportFailed(String),

    #[error("Capture provider failure: {0}")]
    CaptureFailed(String),

    #[error("Storage failure: {0}")]
    StorageFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `AgentError`
pub type Result<T> = std::result::Result<T, AgentError>;
