use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{OutputSchema, StructuredOutcome, StructuredOutputError};
use crate::types::{Message, ToolCall, ToolDefinition};
use crate::{Error, Result};

const DEFAULT_TOOL_DESCRIPTION: &str =
    "Tool for extracting structured output from the model's response.";

/// How extraction failures are handled.
#[derive(Clone, Default)]
pub enum HandleError {
    /// Fail the run with the structured output error.
    Raise,
    /// Re-prompt the model with the error text.
    #[default]
    Retry,
    /// Re-prompt the model with a fixed text.
    Message(String),
    /// Re-prompt the model with the formatter's text; a formatter error fails the run.
    Custom(Arc<dyn Fn(&StructuredOutputError) -> Result<String> + Send + Sync>),
}

impl HandleError {
    pub fn custom(
        f: impl Fn(&StructuredOutputError) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        HandleError::Custom(Arc::new(f))
    }
}

impl fmt::Debug for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::Raise => f.write_str("Raise"),
            HandleError::Retry => f.write_str("Retry"),
            HandleError::Message(m) => f.debug_tuple("Message").field(m).finish(),
            HandleError::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Structured output through synthetic extraction tools.
#[derive(Debug, Clone)]
pub struct ToolStrategy {
    tools: Vec<(String, OutputSchema)>,
    tool_message_content: Option<String>,
    handle_error: HandleError,
}

impl ToolStrategy {
    /// Each schema becomes one extraction tool, named after its title or
    /// `extract-<n>` when it has none.
    pub fn new(schemas: impl IntoIterator<Item = OutputSchema>) -> Self {
        let tools = schemas
            .into_iter()
            .enumerate()
            .map(|(i, schema)| {
                let name = schema
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("extract-{}", i + 1));
                (name, schema)
            })
            .collect();
        Self {
            tools,
            tool_message_content: None,
            handle_error: HandleError::default(),
        }
    }

    /// Text of the closing assistant message after a successful extraction.
    pub fn with_tool_message_content(mut self, content: impl Into<String>) -> Self {
        self.tool_message_content = Some(content.into());
        self
    }

    pub fn with_handle_error(mut self, handle_error: HandleError) -> Self {
        self.handle_error = handle_error;
        self
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|(name, _)| name.as_str())
    }

    pub fn handles(&self, name: &str) -> bool {
        self.tools.iter().any(|(n, _)| n == name)
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|(name, schema)| {
                ToolDefinition::new(
                    name.clone(),
                    schema
                        .description
                        .clone()
                        .unwrap_or_else(|| DEFAULT_TOOL_DESCRIPTION.to_string()),
                    schema.schema().clone(),
                )
            })
            .collect()
    }

    pub fn resolve(&self, response: &Message) -> Result<StructuredOutcome> {
        let calls: Vec<&ToolCall> = response
            .tool_calls
            .iter()
            .filter(|call| self.handles(&call.name))
            .collect();

        match calls.as_slice() {
            [] => Ok(StructuredOutcome::Passthrough),
            [call] => {
                let Some((_, schema)) = self.tools.iter().find(|(n, _)| *n == call.name) else {
                    return Ok(StructuredOutcome::Passthrough);
                };
                match schema.validate(&call.args) {
                    Ok(()) => {
                        debug!(tool = %call.name, "structured response extracted");
                        let json = call.args.to_string();
                        let closing = self
                            .tool_message_content
                            .clone()
                            .unwrap_or_else(|| format!("Returning structured response: {json}"));
                        Ok(StructuredOutcome::Resolved {
                            value: call.args.clone(),
                            messages: vec![
                                response.clone(),
                                Message::tool(&call.id, &call.name, json),
                                Message::assistant(closing),
                            ],
                        })
                    }
                    Err(reason) => self.repair(
                        StructuredOutputError::Parsing {
                            tool_name: call.name.clone(),
                            reason,
                        },
                        response,
                        &calls,
                    ),
                }
            }
            _ => self.repair(
                StructuredOutputError::MultipleStructuredOutputs {
                    tool_names: calls.iter().map(|c| c.name.clone()).collect(),
                },
                response,
                &calls,
            ),
        }
    }

    fn repair(
        &self,
        error: StructuredOutputError,
        response: &Message,
        calls: &[&ToolCall],
    ) -> Result<StructuredOutcome> {
        let content = match &self.handle_error {
            HandleError::Raise => return Err(Error::StructuredOutput(error)),
            HandleError::Retry => format!("Error: {error}\n Please fix your mistakes."),
            HandleError::Message(text) => text.clone(),
            HandleError::Custom(formatter) => formatter(&error)?,
        };
        warn!(kind = error.kind(), error = %error, "structured output rejected, re-prompting model");
        let mut messages = vec![response.clone()];
        messages.extend(
            calls
                .iter()
                .map(|call| Message::tool_error(&call.id, &call.name, content.clone())),
        );
        Ok(StructuredOutcome::Repair { messages })
    }
}
