//! Retries failed tool calls with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;

use super::{IntoMiddleware, MiddlewareDefinition};
use crate::Result;
use crate::retry::{OnFailure, RetryOn, RetryPolicy, failure_text};
use crate::tools::{ToolCallNext, ToolCallRequest, ToolCallResult, WrapToolCall};
use crate::types::Message;

pub const TOOL_RETRY_MIDDLEWARE: &str = "toolRetryMiddleware";

/// `wrap_tool_call` middleware around the retry controller, optionally
/// restricted to some tools.
#[derive(Debug, Clone, Default)]
pub struct ToolRetryMiddleware {
    policy: RetryPolicy,
    tools: Option<Vec<String>>,
}

impl ToolRetryMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Only retry calls to these tools; others pass straight through.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.policy.retry_on = retry_on;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.policy.on_failure = on_failure;
        self
    }

    pub fn build(self) -> Result<MiddlewareDefinition> {
        self.policy.validate()?;
        Ok(MiddlewareDefinition::new(TOOL_RETRY_MIDDLEWARE).wrap_tool_call(ToolRetryHook {
            policy: self.policy,
            tools: self.tools,
        }))
    }
}

impl IntoMiddleware for ToolRetryMiddleware {
    fn into_middleware(self) -> Result<MiddlewareDefinition> {
        self.build()
    }
}

struct ToolRetryHook {
    policy: RetryPolicy,
    tools: Option<Vec<String>>,
}

impl ToolRetryHook {
    fn applies_to(&self, name: &str) -> bool {
        self.tools
            .as_ref()
            .is_none_or(|tools| tools.iter().any(|t| t == name))
    }
}

#[async_trait]
impl WrapToolCall for ToolRetryHook {
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: ToolCallNext,
    ) -> Result<ToolCallResult> {
        if !self.applies_to(&request.call.name) {
            return next.run(request).await;
        }

        let cancel = request.runtime.cancellation.clone();
        let call = request.call.clone();
        let outcome = self
            .policy
            .execute(&cancel, |_| next.run(request.clone()))
            .await;
        match outcome {
            Ok(result) => Ok(result),
            Err(failure) => {
                let subject = format!("Tool '{}'", call.name);
                let text = self
                    .policy
                    .resolve_failure(failure, |e, n| failure_text(&subject, e, n))?;
                Ok(Message::tool_error(&call.id, &call.name, text).into())
            }
        }
    }
}
