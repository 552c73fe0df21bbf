//! Model collaborator interface and the model invocation chain.

mod chain;
mod request;

pub use chain::{
    ModelCallNext, ModelHandler, RetryModelRequest, WrapModelCall, retry_request_fn,
    wrap_model_fn,
};
pub(crate) use chain::{ModelInvoker, build_model_chain};
pub use request::{ModelRequest, ModelResponse};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::structured::ProviderFormat;
use crate::types::{Message, ToolChoice, ToolDefinition};

/// Failure reported by a model adapter. `kind` is the tag retry filters match on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ModelError {
    pub kind: String,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Per-call options handed to a model adapter.
#[derive(Debug, Clone, Default)]
pub struct ModelCallOptions {
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    /// Native JSON-schema response mode, when a provider strategy is active.
    pub response_format: Option<ProviderFormat>,
    /// Fires when the caller aborts the run.
    pub cancellation: CancellationToken,
}

/// A chat model. Adapters for concrete providers implement this.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str {
        "chat_model"
    }

    async fn invoke(&self, messages: &[Message], options: &ModelCallOptions) -> Result<Message>;
}

/// A model with tools and tool choice attached.
#[derive(Clone)]
pub struct BoundModel {
    inner: Arc<dyn ChatModel>,
    tools: Vec<ToolDefinition>,
    tool_choice: Option<ToolChoice>,
}

impl BoundModel {
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn tool_choice(&self) -> Option<&ToolChoice> {
        self.tool_choice.as_ref()
    }
}

#[async_trait]
impl ChatModel for BoundModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, messages: &[Message], options: &ModelCallOptions) -> Result<Message> {
        let mut merged = options.clone();
        let mut tools = self.tools.clone();
        tools.extend(options.tools.iter().cloned());
        merged.tools = tools;
        if merged.tool_choice.is_none() {
            merged.tool_choice = self.tool_choice.clone();
        }
        self.inner.invoke(messages, &merged).await
    }
}

pub trait ChatModelExt {
    fn bind_tools(&self, tools: Vec<ToolDefinition>, tool_choice: Option<ToolChoice>)
    -> BoundModel;
}

impl ChatModelExt for Arc<dyn ChatModel> {
    fn bind_tools(
        &self,
        tools: Vec<ToolDefinition>,
        tool_choice: Option<ToolChoice>,
    ) -> BoundModel {
        BoundModel {
            inner: self.clone(),
            tools,
            tool_choice,
        }
    }
}
