//! Error handling

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    // Lifecycle errors
    #[error("agent is already initialized; call shutdown() first")]
    AlreadyInitialized,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no writable config directory: {0}")]
    StorageUnavailable(String),

    // Remote API errors
    #[error("device registration failed: {0}")]
    RegistrationFailed(String),

    #[error("remote API error: {0}")]
    RemoteApi(String),

    // Delivery errors
    #[error("sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("scheduler is closed")]
    SchedulerClosed,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    // Generic errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::RemoteApi(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for AgentError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}
