//! Error taxonomy.
//!
//! [`AutoClawError`] covers startup and infrastructure failures (config,
//! playbook resolution, durable store, desktop backends). [`ActionError`] is
//! the outcome of a single task execution and never escapes the worker.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutoClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Playbook resolution error: {0}")]
    Resolution(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Task queue closed")]
    QueueClosed,

    #[error("Missing asset: {0}")]
    MissingAsset(String),

    #[error("Desktop backend error: {0}")]
    Desktop(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AutoClawError>;

/// Why a step or task did not succeed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("'{image}' not found after {attempts} attempt(s)")]
    NotFound { image: String, attempts: u32 },

    #[error("timed out after {secs:.1}s waiting for '{image}'")]
    Timeout { image: String, secs: f64 },

    #[error("expected '{expected}' but read '{actual}'")]
    MismatchExpected { expected: String, actual: String },

    #[error("gave up after {attempts} attempt(s): {last}")]
    PermanentFailure {
        attempts: u32,
        last: Box<ActionError>,
    },

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("desktop error: {0}")]
    Desktop(String),
}

impl From<AutoClawError> for ActionError {
    fn from(e: AutoClawError) -> Self {
        ActionError::Desktop(e.to_string())
    }
}
