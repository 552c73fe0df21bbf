//! Structured output strategies.
//!
//! A [`ResponseFormat`] turns a model turn into a typed value, either by
//! offering the model synthetic extraction tools ([`ToolStrategy`]) or by
//! asking the provider for schema-constrained JSON ([`ProviderStrategy`]).

mod provider;
mod tool_strategy;

pub use provider::{ProviderFormat, ProviderStrategy};
pub use tool_strategy::{HandleError, ToolStrategy};

use schemars::JsonSchema;
use serde_json::Value;

use crate::schema::{JsonSchemaValidator, TypedValidator};
use crate::types::{Message, ToolDefinition};
use crate::Result;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StructuredOutputError {
    #[error(
        "Model incorrectly returned multiple structured responses ({}) when only one is expected.",
        tool_names.join(", ")
    )]
    MultipleStructuredOutputs { tool_names: Vec<String> },

    #[error("Failed to parse structured output for tool '{tool_name}': {reason}.")]
    Parsing { tool_name: String, reason: String },
}

impl StructuredOutputError {
    pub fn kind(&self) -> &'static str {
        match self {
            StructuredOutputError::MultipleStructuredOutputs { .. } => {
                "MultipleStructuredOutputsError"
            }
            StructuredOutputError::Parsing { .. } => "StructuredOutputParsingError",
        }
    }
}

/// One target schema for structured output.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: Option<String>,
    pub description: Option<String>,
    validator: JsonSchemaValidator,
}

impl OutputSchema {
    /// Build from a raw JSON schema. `title` and `description` are picked up
    /// when present.
    pub fn from_json(schema: Value) -> Self {
        let name = schema.get("title").and_then(Value::as_str).map(String::from);
        let description = schema
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);
        Self {
            name,
            description,
            validator: JsonSchemaValidator::new(schema),
        }
    }

    /// Build from a Rust type through schemars.
    pub fn from_type<T>() -> Self
    where
        T: JsonSchema + serde::Serialize + serde::de::DeserializeOwned,
    {
        Self::from_json(TypedValidator::<T>::json_schema())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn schema(&self) -> &Value {
        self.validator.schema()
    }

    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        self.validator.check(value)
    }
}

/// What the strategy decided about one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutcome {
    /// Nothing to extract this turn; the response is used as-is.
    Passthrough,
    /// A value was extracted; `messages` replace the raw response.
    Resolved { value: Value, messages: Vec<Message> },
    /// Extraction failed; `messages` replace the raw response and the model
    /// must be called again.
    Repair { messages: Vec<Message> },
}

#[derive(Debug, Clone)]
pub enum ResponseFormat {
    Tool(ToolStrategy),
    Provider(ProviderStrategy),
}

impl ResponseFormat {
    pub fn tool(schemas: impl IntoIterator<Item = OutputSchema>) -> Self {
        ResponseFormat::Tool(ToolStrategy::new(schemas))
    }

    pub fn provider(schema: OutputSchema) -> Self {
        ResponseFormat::Provider(ProviderStrategy::new(schema))
    }

    /// Synthetic tools the model must be offered for this format.
    pub fn extraction_tools(&self) -> Vec<ToolDefinition> {
        match self {
            ResponseFormat::Tool(strategy) => strategy.tool_definitions(),
            ResponseFormat::Provider(_) => Vec::new(),
        }
    }

    pub fn is_extraction_tool(&self, name: &str) -> bool {
        match self {
            ResponseFormat::Tool(strategy) => strategy.handles(name),
            ResponseFormat::Provider(_) => false,
        }
    }

    pub fn provider_format(&self) -> Option<ProviderFormat> {
        match self {
            ResponseFormat::Tool(_) => None,
            ResponseFormat::Provider(strategy) => Some(strategy.format()),
        }
    }

    pub fn resolve(&self, response: &Message) -> Result<StructuredOutcome> {
        match self {
            ResponseFormat::Tool(strategy) => strategy.resolve(response),
            ResponseFormat::Provider(strategy) => Ok(strategy.resolve(response)),
        }
    }
}

impl From<ToolStrategy> for ResponseFormat {
    fn from(strategy: ToolStrategy) -> Self {
        ResponseFormat::Tool(strategy)
    }
}

impl From<ProviderStrategy> for ResponseFormat {
    fn from(strategy: ProviderStrategy) -> Self {
        ResponseFormat::Provider(strategy)
    }
}
