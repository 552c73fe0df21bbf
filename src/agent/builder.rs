//! `create_agent` and its builder.

use std::sync::Arc;

use tracing::debug;

use super::config::AgentConfig;
use super::executor::Agent;
use crate::Result;
use crate::checkpoint::Checkpointer;
use crate::config::Settings;
use crate::middleware::{ComposeOptions, IntoMiddleware, MiddlewareDefinition, compose};
use crate::model::ChatModel;
use crate::retry::RetryPolicy;
use crate::schema::StateSchema;
use crate::structured::ResponseFormat;
use crate::tools::Tool;

/// Start building an agent around `model`.
pub fn create_agent(model: Arc<dyn ChatModel>) -> AgentBuilder {
    AgentBuilder::new(model)
}

pub struct AgentBuilder {
    model: Arc<dyn ChatModel>,
    config: AgentConfig,
    tools: Vec<Arc<dyn Tool>>,
    middleware: Vec<Result<MiddlewareDefinition>>,
    state_schema: StateSchema,
    context_schema: StateSchema,
    response_format: Option<ResponseFormat>,
    model_retry: Option<RetryPolicy>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl AgentBuilder {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            config: AgentConfig::default(),
            tools: Vec::new(),
            middleware: Vec::new(),
            state_schema: StateSchema::default(),
            context_schema: StateSchema::default(),
            response_format: None,
            model_retry: None,
            checkpointer: None,
        }
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Append a middleware. Invalid middleware options are reported by
    /// [`build`](Self::build).
    pub fn middleware(mut self, middleware: impl IntoMiddleware) -> Self {
        self.middleware.push(middleware.into_middleware());
        self
    }

    pub fn state_schema(mut self, schema: StateSchema) -> Self {
        self.state_schema = schema;
        self
    }

    pub fn context_schema(mut self, schema: StateSchema) -> Self {
        self.context_schema = schema;
        self
    }

    pub fn response_format(mut self, format: impl Into<ResponseFormat>) -> Self {
        self.response_format = Some(format.into());
        self
    }

    /// Retry policy applied to every raw model call, below all middleware.
    pub fn model_retry(mut self, policy: RetryPolicy) -> Self {
        self.model_retry = Some(policy);
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.config.recursion_limit = limit;
        self
    }

    pub fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.config.parallel_tool_calls = parallel;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply loaded settings on top of what has been configured so far.
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.config = self.config.apply_settings(settings);
        if let Some(retry) = &settings.model_retry {
            self.model_retry = Some(retry.to_policy());
        }
        self
    }

    /// Validate the configuration and compose the middleware pipeline.
    pub fn build(self) -> Result<Agent> {
        let middleware = self.middleware.into_iter().collect::<Result<Vec<_>>>()?;
        let pipeline = compose(
            &middleware,
            ComposeOptions {
                tools: self.tools,
                state_schema: self.state_schema,
                context_schema: self.context_schema,
                response_format: self.response_format,
                model_retry: self.model_retry,
            },
        )?;

        debug!(
            agent = %self.config.name,
            middleware = pipeline.middleware.len(),
            recursion_limit = self.config.recursion_limit,
            "agent built"
        );

        Ok(Agent::new(
            self.model,
            self.config,
            Arc::new(pipeline),
            self.checkpointer,
        ))
    }
}
