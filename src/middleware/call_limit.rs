//! Per-thread and per-run limits on model and tool calls.

use async_trait::async_trait;
use serde_json::json;

use super::hooks::{HookOutcome, NodeHook};
use super::{IntoMiddleware, MiddlewareDefinition, Phase};
use crate::agent::Runtime;
use crate::schema::{StateSchema, TypedValidator};
use crate::types::{AgentState, JumpTarget, Message, Role, StatePatch};
use crate::{Error, Result};

pub const THREAD_MODEL_CALL_COUNT: &str = "thread_model_call_count";
pub const RUN_MODEL_CALL_COUNT: &str = "run_model_call_count";

/// What happens once a limit is hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitBehavior {
    /// Append an explanatory assistant message and jump to the end.
    #[default]
    End,
    /// Fail the run.
    Error,
}

fn exceeded(limit: Option<u32>, count: u32) -> Option<u32> {
    limit.filter(|&l| count >= l)
}

fn stop(middleware: &str, behavior: ExitBehavior, message: String) -> Result<HookOutcome> {
    match behavior {
        ExitBehavior::End => Ok(HookOutcome::end_with_message(Message::assistant(message))),
        ExitBehavior::Error => Err(Error::middleware(middleware, message)),
    }
}

/// Caps model calls per thread (persisted across invokes through a
/// checkpointer) and per run.
#[derive(Debug, Clone, Default)]
pub struct ModelCallLimitMiddleware {
    thread_limit: Option<u32>,
    run_limit: Option<u32>,
    exit_behavior: ExitBehavior,
}

impl ModelCallLimitMiddleware {
    pub const NAME: &'static str = "ModelCallLimitMiddleware";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_limit(mut self, limit: u32) -> Self {
        self.thread_limit = Some(limit);
        self
    }

    pub fn with_run_limit(mut self, limit: u32) -> Self {
        self.run_limit = Some(limit);
        self
    }

    pub fn with_exit_behavior(mut self, behavior: ExitBehavior) -> Self {
        self.exit_behavior = behavior;
        self
    }

    pub fn build(self) -> Result<MiddlewareDefinition> {
        let schema = StateSchema::new()
            .field(THREAD_MODEL_CALL_COUNT, TypedValidator::<u32>::defaulted())
            .field(RUN_MODEL_CALL_COUNT, TypedValidator::<u32>::defaulted());
        Ok(MiddlewareDefinition::new(Self::NAME)
            .with_state_schema(schema)
            .before_agent(ResetRunCount)
            .before_model(self)
            .after_model(CountModelCall)
            .can_jump_to(Phase::BeforeModel, [JumpTarget::End]))
    }

    fn check(&self, thread_count: u32, run_count: u32) -> Option<String> {
        let mut reasons = Vec::new();
        if let Some(limit) = exceeded(self.thread_limit, thread_count) {
            reasons.push(format!("thread limit ({thread_count}/{limit})"));
        }
        if let Some(limit) = exceeded(self.run_limit, run_count) {
            reasons.push(format!("run limit ({run_count}/{limit})"));
        }
        (!reasons.is_empty())
            .then(|| format!("Model call limits exceeded: {}", reasons.join(", ")))
    }
}

impl IntoMiddleware for ModelCallLimitMiddleware {
    fn into_middleware(self) -> Result<MiddlewareDefinition> {
        self.build()
    }
}

#[async_trait]
impl NodeHook for ModelCallLimitMiddleware {
    async fn run(&self, state: &AgentState, _: &Runtime) -> Result<HookOutcome> {
        let thread_count = state.get_as::<u32>(THREAD_MODEL_CALL_COUNT).unwrap_or(0);
        let run_count = state.get_as::<u32>(RUN_MODEL_CALL_COUNT).unwrap_or(0);
        match self.check(thread_count, run_count) {
            Some(message) => stop(Self::NAME, self.exit_behavior, message),
            None => Ok(HookOutcome::none()),
        }
    }
}

struct ResetRunCount;

#[async_trait]
impl NodeHook for ResetRunCount {
    async fn run(&self, _: &AgentState, _: &Runtime) -> Result<HookOutcome> {
        Ok(StatePatch::new().set(RUN_MODEL_CALL_COUNT, json!(0)).into())
    }
}

struct CountModelCall;

#[async_trait]
impl NodeHook for CountModelCall {
    async fn run(&self, state: &AgentState, _: &Runtime) -> Result<HookOutcome> {
        let thread_count = state.get_as::<u32>(THREAD_MODEL_CALL_COUNT).unwrap_or(0);
        let run_count = state.get_as::<u32>(RUN_MODEL_CALL_COUNT).unwrap_or(0);
        Ok(StatePatch::new()
            .set(THREAD_MODEL_CALL_COUNT, json!(thread_count + 1))
            .set(RUN_MODEL_CALL_COUNT, json!(run_count + 1))
            .into())
    }
}

/// Caps tool calls, counted from the assistant messages in the conversation.
/// The run count covers calls made since the latest user message.
#[derive(Debug, Clone)]
pub struct ToolCallLimitMiddleware {
    tool_name: Option<String>,
    thread_limit: Option<u32>,
    run_limit: Option<u32>,
    exit_behavior: ExitBehavior,
}

impl ToolCallLimitMiddleware {
    pub fn new() -> Self {
        Self {
            tool_name: None,
            thread_limit: None,
            run_limit: None,
            exit_behavior: ExitBehavior::End,
        }
    }

    /// Count only calls to `tool_name`.
    pub fn for_tool(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::new()
        }
    }

    pub fn with_thread_limit(mut self, limit: u32) -> Self {
        self.thread_limit = Some(limit);
        self
    }

    pub fn with_run_limit(mut self, limit: u32) -> Self {
        self.run_limit = Some(limit);
        self
    }

    pub fn with_exit_behavior(mut self, behavior: ExitBehavior) -> Self {
        self.exit_behavior = behavior;
        self
    }

    /// `ToolCallLimitMiddleware`, or `ToolCallLimitMiddleware[<tool>]` when
    /// filtered, so one agent can carry a limit per tool.
    pub fn name(&self) -> String {
        match &self.tool_name {
            Some(tool) => format!("ToolCallLimitMiddleware[{tool}]"),
            None => "ToolCallLimitMiddleware".to_string(),
        }
    }

    pub fn build(self) -> Result<MiddlewareDefinition> {
        if self.thread_limit.is_none() && self.run_limit.is_none() {
            return Err(Error::config("At least one limit must be specified"));
        }
        Ok(MiddlewareDefinition::new(self.name())
            .before_model(self)
            .can_jump_to(Phase::BeforeModel, [JumpTarget::End]))
    }

    fn counts(&self, messages: &[Message]) -> (u32, u32) {
        let last_user = messages.iter().rposition(|m| m.role == Role::User);
        let mut thread = 0;
        let mut run = 0;
        for (i, message) in messages.iter().enumerate().filter(|(_, m)| m.is_ai()) {
            let calls = message
                .tool_calls
                .iter()
                .filter(|c| self.tool_name.as_ref().is_none_or(|t| *t == c.name))
                .count() as u32;
            thread += calls;
            if last_user.is_none_or(|u| i > u) {
                run += calls;
            }
        }
        (thread, run)
    }

    fn check(&self, thread_count: u32, run_count: u32) -> Option<String> {
        let mut reasons = Vec::new();
        if let Some(limit) = exceeded(self.thread_limit, thread_count) {
            reasons.push(format!("thread limit reached ({thread_count}/{limit})"));
        }
        if let Some(limit) = exceeded(self.run_limit, run_count) {
            reasons.push(format!("run limit reached ({run_count}/{limit})"));
        }
        if reasons.is_empty() {
            return None;
        }
        let subject = match &self.tool_name {
            Some(tool) => format!("'{tool}' tool call"),
            None => "Tool call".to_string(),
        };
        Some(format!("{subject} limits exceeded: {}", reasons.join(", ")))
    }
}

impl Default for ToolCallLimitMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoMiddleware for ToolCallLimitMiddleware {
    fn into_middleware(self) -> Result<MiddlewareDefinition> {
        self.build()
    }
}

#[async_trait]
impl NodeHook for ToolCallLimitMiddleware {
    async fn run(&self, state: &AgentState, _: &Runtime) -> Result<HookOutcome> {
        let (thread_count, run_count) = self.counts(&state.messages);
        match self.check(thread_count, run_count) {
            Some(message) => stop(&self.name(), self.exit_behavior, message),
            None => Ok(HookOutcome::none()),
        }
    }
}
