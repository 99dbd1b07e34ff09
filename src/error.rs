//! Error types for Fleet Runner.

use std::time::Duration;

/// Top-level error type for the runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that reject a dispatch call before any worker starts.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Worker identity {id} appears more than once")]
    DuplicateWorker { id: String },

    #[error("Concurrency limit must be at least 1, got {limit}")]
    InvalidConcurrency { limit: usize },

    #[error("Task {task} has repetition {repetition}, must be at least 1")]
    InvalidRepetition { task: String, repetition: u32 },

    #[error("Task definition at position {position} has an empty name")]
    EmptyTaskName { position: usize },

    #[error("Task {task} may run at most once per run")]
    RepetitionLimited { task: String },

    #[error("A dispatch run is already in progress")]
    AlreadyRunning,

    #[error("Run driver failed: {0}")]
    DriverFailed(String),
}

/// Per-worker resource acquisition errors. Never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Resource for worker {worker_id} unavailable: {reason}")]
    Unavailable { worker_id: String, reason: String },

    #[error("Resource for worker {worker_id} timed out after {timeout:?}")]
    Timeout { worker_id: String, timeout: Duration },
}

/// Per-worker session setup errors. Never fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session setup for worker {worker_id} failed: {reason}")]
    Failed { worker_id: String, reason: String },
}

/// Result type alias for the runner.
pub type Result<T> = std::result::Result<T, Error>;
