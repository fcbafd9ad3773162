//! Engine error type.
//!
//! [`EngineError`] covers everything the orchestration loop and the shipped
//! collaborators can fail with. Core graph and budget errors are wrapped
//! unchanged so the loop can still match on them.

use std::time::Duration;

use bumpfix_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Plan graph or context budget failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON from a tool or a manifest.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The LLM provider failed at the transport level or returned non-2xx.
    #[error("provider error: {0}")]
    Provider(String),

    /// An external command could not be run or exited unexpectedly.
    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// A collaborator call exceeded its deadline.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Command {
            command: command.into(),
            message: message.into(),
        }
    }
}
