//! # agent-middleware
//!
//! A middleware-composed agent execution engine.
//!
//! An agent drives a single conversational loop: it calls a language model,
//! dispatches the tool calls the model requests, and runs user-supplied
//! middleware hooks around every phase. Middleware can extend the agent state,
//! wrap model and tool calls, jump between phases, and recover from failures.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agent_middleware::{AgentState, InvokeOptions, Message, create_agent};
//! use agent_middleware::middleware::ModelRetryMiddleware;
//!
//! let agent = create_agent(model)
//!     .tool(search_tool)
//!     .middleware(ModelRetryMiddleware::new().with_max_retries(3))
//!     .recursion_limit(10)
//!     .build()?;
//!
//! let state = agent
//!     .invoke(AgentState::from_messages(vec![Message::user("hi")]), InvokeOptions::default())
//!     .await?;
//! println!("{}", state.last_ai_message().map(|m| m.text()).unwrap_or_default());
//! ```
//!
//! ## Phases
//!
//! `BeforeAgent -> (BeforeModel -> ModelCall -> AfterModel -> [ToolExecution])* -> AfterAgent`
//!
//! Hooks in every phase run in middleware declaration order. `wrap_model_call` and
//! `wrap_tool_call` hooks compose as an onion where the first declared middleware is
//! the outermost layer.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod middleware;
pub mod model;
pub mod retry;
pub mod schema;
pub mod structured;
pub mod tools;
pub mod types;

pub use agent::{Agent, AgentBuilder, AgentConfig, InvokeOptions, Runtime, create_agent};
pub use checkpoint::{Checkpoint, Checkpointer, MemoryCheckpointer};
pub use config::{ConfigError, RetrySettings, Settings};
pub use middleware::{HookOutcome, MiddlewareDefinition, Phase};
pub use model::{ChatModel, ChatModelExt, ModelCallOptions, ModelError, ModelRequest, ModelResponse};
pub use retry::{ExponentialBackoff, OnFailure, RetryOn, RetryPolicy};
pub use schema::{JsonSchemaValidator, StateSchema, TypedValidator, Validator};
pub use structured::{
    HandleError, OutputSchema, ProviderStrategy, ResponseFormat, StructuredOutputError,
    ToolStrategy,
};
pub use tools::{FnTool, SchemaTool, Tool, ToolContext, ToolError, ToolOutput, ToolRegistry};
pub use types::{
    AgentState, Command, JumpTarget, Message, MessagesUpdate, Role, StatePatch, ToolCall,
    ToolChoice, ToolDefinition, ToolStatus,
};

/// Error type for agent-middleware operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A hook requested a jump its middleware never declared for that phase.
    #[error("Invalid jump target: {target}, no {phase}JumpTo defined in middleware {middleware}.")]
    UndeclaredJump {
        target: JumpTarget,
        phase: Phase,
        middleware: String,
    },

    /// A hook requested a jump outside its declared permission set.
    #[error("Invalid jump target: {target}, must be one of: {allowed}.")]
    DisallowedJump { target: JumpTarget, allowed: String },

    /// Two middleware share a name.
    #[error("Duplicate middleware name: {0}")]
    DuplicateMiddleware(String),

    /// Two tools share a name across the agent and its middleware.
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    /// A `wrap_model_call` hook introduced tools that were not in its request.
    #[error(
        "You have added a new tool in \"wrapModelCall\" hook of middleware \"{middleware}\": {}. This is not supported.",
        tools.join(", ")
    )]
    ToolAdded {
        middleware: String,
        tools: Vec<String>,
    },

    /// A `wrap_model_call` hook changed the definition of an existing tool.
    #[error(
        "You have modified a tool in \"wrapModelCall\" hook of middleware \"{middleware}\": {}. This is not supported.",
        tools.join(", ")
    )]
    ToolModified {
        middleware: String,
        tools: Vec<String>,
    },

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A state or context value was rejected by its field validator.
    #[error("Invalid value for state field '{field}': {message}")]
    StateValidation { field: String, message: String },

    /// The model collaborator failed.
    #[error("Model call failed: {0}")]
    Model(#[from] model::ModelError),

    /// A tool failed.
    #[error("Tool execution failed: {0}")]
    Tool(#[from] tools::ToolError),

    /// Structured output could not be extracted.
    #[error(transparent)]
    StructuredOutput(#[from] structured::StructuredOutputError),

    /// A hook raised an error.
    #[error("Middleware '{middleware}' failed: {message}")]
    Middleware { middleware: String, message: String },

    /// A hook returned an explicit termination.
    #[error("Middleware '{middleware}' terminated the run: {reason}")]
    Terminated { middleware: String, reason: String },

    /// The loop made more model calls than allowed.
    #[error("Recursion limit of {limit} reached without hitting a stop condition")]
    RecursionLimit { limit: usize },

    /// The caller cancelled the run.
    #[error("Operation cancelled")]
    Cancelled,

    /// Checkpoint store failure.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] config::ConfigError),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Composition or setup problems; never retried.
    Configuration,
    /// Model or tool failures that may succeed on retry
    Transient,
    /// Values rejected by schemas or structured output parsing
    Validation,
    /// Runs stopped on purpose (termination, cancellation, limits)
    Termination,
    /// Internal errors (JSON, checkpoint storage)
    Internal,
}

impl Error {
    pub fn middleware(middleware: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Middleware {
            middleware: middleware.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Stable tag used to match errors in retry filters.
    pub fn kind(&self) -> &str {
        match self {
            Error::UndeclaredJump { .. } | Error::DisallowedJump { .. } => "InvalidJumpTarget",
            Error::DuplicateMiddleware(_) => "DuplicateMiddleware",
            Error::DuplicateTool(_) => "DuplicateTool",
            Error::ToolAdded { .. } => "ToolAdded",
            Error::ToolModified { .. } => "ToolModified",
            Error::Config(_) => "ConfigError",
            Error::StateValidation { .. } => "StateValidationError",
            Error::Model(e) => &e.kind,
            Error::Tool(e) => e.kind(),
            Error::StructuredOutput(e) => e.kind(),
            Error::Middleware { .. } => "MiddlewareError",
            Error::Terminated { .. } => "Terminated",
            Error::RecursionLimit { .. } => "RecursionLimitError",
            Error::Cancelled => "Cancelled",
            Error::Checkpoint(_) => "CheckpointError",
            Error::Json(_) => "JsonError",
            Error::Settings(_) => "SettingsError",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UndeclaredJump { .. }
            | Error::DisallowedJump { .. }
            | Error::DuplicateMiddleware(_)
            | Error::DuplicateTool(_)
            | Error::ToolAdded { .. }
            | Error::ToolModified { .. }
            | Error::Config(_)
            | Error::Settings(_) => ErrorCategory::Configuration,
            Error::Model(_) | Error::Tool(_) => ErrorCategory::Transient,
            Error::StateValidation { .. } | Error::StructuredOutput(_) => {
                ErrorCategory::Validation
            }
            Error::Middleware { .. }
            | Error::Terminated { .. }
            | Error::RecursionLimit { .. }
            | Error::Cancelled => ErrorCategory::Termination,
            Error::Checkpoint(_) | Error::Json(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_config_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

/// Result type alias for agent-middleware operations.
pub type Result<T> = std::result::Result<T, Error>;
