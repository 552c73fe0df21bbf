//! Middleware definitions, their composition, and the built-in middleware.

mod call_limit;
mod composer;
mod definition;
mod hooks;
mod model_retry;
mod tool_retry;

pub use call_limit::{ExitBehavior, ModelCallLimitMiddleware, ToolCallLimitMiddleware};
pub(crate) use composer::{ComposeOptions, Pipeline, compose};
pub use definition::{MiddlewareDefinition, Phase};
pub use hooks::{FnHook, HookOutcome, NodeHook, hook_fn};
pub use model_retry::ModelRetryMiddleware;
pub use tool_retry::ToolRetryMiddleware;

pub use crate::model::{
    ModelCallNext, RetryModelRequest, WrapModelCall, retry_request_fn, wrap_model_fn,
};
pub use crate::tools::{ToolCallNext, ToolCallRequest, ToolCallResult, WrapToolCall, wrap_tool_fn};

use crate::Result;

/// Anything that can become a [`MiddlewareDefinition`]. Built-in middleware
/// validate their options here, so errors surface when the agent is built.
pub trait IntoMiddleware {
    fn into_middleware(self) -> Result<MiddlewareDefinition>;
}

impl IntoMiddleware for MiddlewareDefinition {
    fn into_middleware(self) -> Result<MiddlewareDefinition> {
        Ok(self)
    }
}
