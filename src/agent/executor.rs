//! The built agent and its `invoke` entry point.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::config::AgentConfig;
use super::execution::Execution;
use super::runtime::Runtime;
use crate::Result;
use crate::checkpoint::Checkpointer;
use crate::middleware::Pipeline;
use crate::model::ChatModel;
use crate::types::AgentState;

/// Per-call options for [`Agent::invoke`].
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Read-only context values, validated against the context schema.
    pub context: Map<String, Value>,
    /// Thread to restore from and save to when a checkpointer is configured.
    pub thread_id: Option<String>,
    pub cancellation: Option<CancellationToken>,
    /// Overrides the agent's recursion limit for this call.
    pub recursion_limit: Option<usize>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }
}

/// A composed agent. Cheap to clone; concurrent invokes share only the
/// immutable pipeline.
#[derive(Clone)]
pub struct Agent {
    pub(super) model: Arc<dyn ChatModel>,
    pub(super) config: AgentConfig,
    pub(super) pipeline: Arc<Pipeline>,
    pub(super) checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl Agent {
    pub(super) fn new(
        model: Arc<dyn ChatModel>,
        config: AgentConfig,
        pipeline: Arc<Pipeline>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
    ) -> Self {
        Self {
            model,
            config,
            pipeline,
            checkpointer,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.pipeline.middleware.iter().map(String::as_str).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.pipeline.tools.names()
    }

    /// Run the agent loop from `input` until it ends, fails, or is cancelled.
    #[instrument(
        skip_all,
        fields(
            agent = %self.config.name,
            run_id = tracing::field::Empty,
            thread_id = options.thread_id.as_deref().unwrap_or_default(),
        )
    )]
    pub async fn invoke(&self, input: AgentState, options: InvokeOptions) -> Result<AgentState> {
        let InvokeOptions {
            mut context,
            thread_id,
            cancellation,
            recursion_limit,
        } = options;

        self.pipeline.context_schema.prepare(&mut context)?;
        let runtime = Runtime {
            run_id: Uuid::new_v4(),
            thread_id,
            context: Arc::new(context),
            cancellation: cancellation.unwrap_or_default(),
        };
        tracing::Span::current().record("run_id", tracing::field::display(runtime.run_id));

        let mut state = self.restore(input, runtime.thread_id.as_deref()).await?;
        self.pipeline.state_schema.prepare(&mut state.values)?;

        let limit = recursion_limit.unwrap_or(self.config.recursion_limit);
        info!(
            messages = state.messages.len(),
            recursion_limit = limit,
            "agent invoke started"
        );

        let execution = Execution::new(self, runtime, limit, state);
        let (state, stats) = execution.run().await?;

        info!(
            model_calls = stats.model_calls,
            tool_calls = stats.tool_calls,
            steps = stats.steps,
            messages = state.messages.len(),
            "agent invoke completed"
        );
        Ok(state)
    }

    /// Merge `input` into the thread's latest checkpoint, if there is one.
    async fn restore(&self, input: AgentState, thread_id: Option<&str>) -> Result<AgentState> {
        let (Some(checkpointer), Some(thread_id)) = (&self.checkpointer, thread_id) else {
            return Ok(input);
        };
        let Some(checkpoint) = checkpointer.load(thread_id).await? else {
            debug!(thread_id, "no checkpoint for thread, starting fresh");
            return Ok(input);
        };

        debug!(
            thread_id,
            step = checkpoint.step,
            messages = checkpoint.state.messages.len(),
            "restored checkpoint"
        );
        let mut state = checkpoint.state;
        state.messages.extend(input.messages);
        state.values.extend(input.values);
        Ok(state)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model.name())
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("checkpointer", &self.checkpointer.as_ref().map(|c| c.name()))
            .finish()
    }
}
