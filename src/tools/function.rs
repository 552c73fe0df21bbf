//! Closure-backed tools.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use super::output::{ToolError, ToolOutput};
use super::traits::{Tool, ToolContext};

/// A tool whose behaviour is an async closure.
pub struct FnTool<F> {
    name: String,
    description: String,
    input_schema: Value,
    return_direct: bool,
    handler: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            return_direct: false,
            handler,
        }
    }

    pub fn with_return_direct(mut self, return_direct: bool) -> Self {
        self.return_direct = return_direct;
        self
    }
}

impl<F> fmt::Debug for FnTool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("return_direct", &self.return_direct)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn return_direct(&self) -> bool {
        self.return_direct
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolOutput, ToolError> {
        (self.handler)(input, context.clone()).await
    }
}
