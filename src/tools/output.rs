//! Tool execution output and error types.

use thiserror::Error;

use crate::types::Command;

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Success(String),
    /// A handled failure, reported to the model as an error tool message.
    Error(String),
    Empty,
    /// Patch state and optionally redirect the loop instead of replying.
    Command(Command),
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self::Success(content.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn command(command: Command) -> Self {
        Self::Command(command)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Success(content) | Self::Error(content) => content,
            Self::Empty | Self::Command(_) => "",
        }
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        Self::Success(content)
    }
}

impl From<&str> for ToolOutput {
    fn from(content: &str) -> Self {
        Self::Success(content.to_string())
    }
}

/// A tool failure. Unlike [`ToolOutput::Error`] these travel through the
/// tool call chain as errors, so retry middleware can see them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{kind}: {message}")]
    Other { kind: String, message: String },
}

impl ToolError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// A failure tagged with a caller-chosen kind, matched by `RetryOn::Kinds`.
    pub fn other(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::InvalidInput { .. } => "InvalidInput",
            Self::ExecutionFailed { .. } => "ExecutionFailed",
            Self::Timeout { .. } => "TimeoutError",
            Self::Other { kind, .. } => kind,
        }
    }

    /// The failure detail without its kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput { message }
            | Self::ExecutionFailed { message }
            | Self::Other { message, .. } => message.clone(),
            Self::Timeout { timeout_ms } => format!("timed out after {timeout_ms}ms"),
        }
    }
}
