//! Onion composition of `wrap_tool_call` hooks around a single tool call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::output::ToolOutput;
use super::traits::{Tool, ToolContext};
use crate::agent::Runtime;
use crate::types::{AgentState, Command, Message, ToolCall};
use crate::{Error, Result};

/// One pending tool call on its way through the chain.
#[derive(Clone)]
pub struct ToolCallRequest {
    pub call: ToolCall,
    /// `None` when the model asked for a tool the agent does not have.
    pub tool: Option<Arc<dyn Tool>>,
    pub state: Arc<AgentState>,
    pub runtime: Runtime,
}

impl ToolCallRequest {
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.call.args = args;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tool = Some(tool);
        self
    }
}

impl fmt::Debug for ToolCallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCallRequest")
            .field("call", &self.call)
            .field("tool", &self.tool.as_ref().map(|t| t.name()))
            .finish_non_exhaustive()
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Message(Message),
    Command(Command),
}

impl ToolCallResult {
    pub fn message(&self) -> Option<&Message> {
        match self {
            ToolCallResult::Message(m) => Some(m),
            ToolCallResult::Command(_) => None,
        }
    }
}

impl From<Message> for ToolCallResult {
    fn from(message: Message) -> Self {
        ToolCallResult::Message(message)
    }
}

impl From<Command> for ToolCallResult {
    fn from(command: Command) -> Self {
        ToolCallResult::Command(command)
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, request: ToolCallRequest) -> Result<ToolCallResult>;
}

/// Continuation handed to a `wrap_tool_call` hook.
#[derive(Clone)]
pub struct ToolCallNext {
    inner: Arc<dyn ToolHandler>,
}

impl ToolCallNext {
    pub async fn run(&self, request: ToolCallRequest) -> Result<ToolCallResult> {
        self.inner.handle(request).await
    }
}

/// Hook that wraps tool execution. It may call `next` zero or more times
/// and may answer with a [`Command`] instead of a message.
#[async_trait]
pub trait WrapToolCall: Send + Sync {
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolCallResult>;
}

pub struct WrapToolFn<F>(F);

pub fn wrap_tool_fn<F, Fut>(f: F) -> WrapToolFn<F>
where
    F: Fn(ToolCallRequest, ToolCallNext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolCallResult>> + Send,
{
    WrapToolFn(f)
}

#[async_trait]
impl<F, Fut> WrapToolCall for WrapToolFn<F>
where
    F: Fn(ToolCallRequest, ToolCallNext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolCallResult>> + Send,
{
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolCallResult> {
        (self.0)(request, next).await
    }
}

struct ToolWrapLayer {
    middleware: String,
    hook: Arc<dyn WrapToolCall>,
    next: Arc<dyn ToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapLayer {
    async fn handle(&self, request: ToolCallRequest) -> Result<ToolCallResult> {
        debug!(middleware = %self.middleware, tool = %request.call.name, "wrap_tool_call");
        let next = ToolCallNext {
            inner: self.next.clone(),
        };
        self.hook.wrap_tool_call(request, next).await
    }
}

/// Innermost handler: runs the tool itself.
pub(crate) struct ToolExecutor {
    available: Vec<String>,
}

impl ToolExecutor {
    pub(crate) fn new(available: Vec<String>) -> Self {
        Self { available }
    }

    fn unknown_tool(&self, call: &ToolCall) -> Message {
        Message::tool_error(
            &call.id,
            &call.name,
            format!(
                "Error: {} is not a valid tool, try one of [{}].",
                call.name,
                self.available.join(", ")
            ),
        )
    }
}

#[async_trait]
impl ToolHandler for ToolExecutor {
    async fn handle(&self, request: ToolCallRequest) -> Result<ToolCallResult> {
        let ToolCallRequest {
            call,
            tool,
            state,
            runtime,
        } = request;
        let Some(tool) = tool else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(self.unknown_tool(&call).into());
        };

        let cancel = runtime.cancellation.clone();
        let context = ToolContext {
            tool_call_id: call.id.clone(),
            state,
            runtime,
        };
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            output = tool.execute(call.args.clone(), &context) => output?,
        };

        Ok(match output {
            ToolOutput::Success(content) => Message::tool(&call.id, &call.name, content).into(),
            ToolOutput::Empty => Message::tool(&call.id, &call.name, "").into(),
            ToolOutput::Error(content) => Message::tool_error(&call.id, &call.name, content).into(),
            ToolOutput::Command(command) => command.into(),
        })
    }
}

/// The assembled chain. Tool failures that escape every layer become error
/// tool messages so the model can react; any other error ends the run.
#[derive(Clone)]
pub(crate) struct ToolChain {
    handler: Arc<dyn ToolHandler>,
}

impl ToolChain {
    pub(crate) async fn call(&self, request: ToolCallRequest) -> Result<ToolCallResult> {
        let call = request.call.clone();
        match self.handler.handle(request).await {
            Err(Error::Tool(e)) => {
                warn!(tool = %call.name, kind = e.kind(), error = %e, "tool call failed");
                Ok(Message::tool_error(
                    &call.id,
                    &call.name,
                    format!("Error: {e}\n Please fix your mistakes."),
                )
                .into())
            }
            other => other,
        }
    }
}

/// Fold `(middleware, hook)` layers around `base`; the first layer ends up
/// outermost.
pub(crate) fn build_tool_chain(
    layers: Vec<(String, Arc<dyn WrapToolCall>)>,
    base: ToolExecutor,
) -> ToolChain {
    let handler = layers
        .into_iter()
        .rev()
        .fold(Arc::new(base) as Arc<dyn ToolHandler>, |next, (middleware, hook)| {
            Arc::new(ToolWrapLayer {
                middleware,
                hook,
                next,
            })
        });
    ToolChain { handler }
}
