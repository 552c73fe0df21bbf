//! Tool trait definitions.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use super::output::{ToolError, ToolOutput};
use crate::agent::Runtime;
use crate::types::{AgentState, ToolDefinition};

/// What a tool sees of the run that called it.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tool_call_id: String,
    pub state: Arc<AgentState>,
    pub runtime: Runtime,
}

/// Core tool trait for all tool implementations.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    /// End the agent loop once this tool has run, returning its output as
    /// the final message.
    fn return_direct(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.input_schema())
    }
}

/// Schema-based tool trait with automatic JSON schema generation.
///
/// Provides a higher-level abstraction over `Tool` with typed inputs
/// and automatic schema derivation via schemars.
#[async_trait]
pub trait SchemaTool: Send + Sync {
    type Input: JsonSchema + DeserializeOwned + Send;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    const STRICT: bool = false;
    const RETURN_DIRECT: bool = false;

    async fn handle(
        &self,
        input: Self::Input,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    fn input_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Self::Input);
        let mut value =
            serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));

        if let Some(obj) = value.as_object_mut()
            && !obj.contains_key("properties")
        {
            obj.insert(
                "properties".to_string(),
                serde_json::Value::Object(serde_json::Map::new()),
            );
        }

        value
    }
}

#[async_trait]
impl<T: SchemaTool + 'static> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> serde_json::Value {
        T::input_schema()
    }

    fn return_direct(&self) -> bool {
        T::RETURN_DIRECT
    }

    fn definition(&self) -> ToolDefinition {
        let mut definition = ToolDefinition::new(T::NAME, T::DESCRIPTION, T::input_schema());
        if T::STRICT {
            definition = definition.with_strict(true);
        }
        definition
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let typed = serde_json::from_value::<T::Input>(input)
            .map_err(|e| ToolError::invalid_input(e.to_string()))?;
        SchemaTool::handle(self, typed, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    struct AddTool;

    #[async_trait]
    impl SchemaTool for AddTool {
        type Input = AddInput;
        const NAME: &'static str = "add";
        const DESCRIPTION: &'static str = "Add two integers";
        const STRICT: bool = true;

        async fn handle(&self, input: AddInput, _: &ToolContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success((input.a + input.b).to_string()))
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            tool_call_id: "call_1".into(),
            state: Arc::new(AgentState::default()),
            runtime: Runtime::default(),
        }
    }

    #[test]
    fn test_schema_tool_definition() {
        let definition = AddTool.definition();
        assert_eq!(definition.name, "add");
        assert_eq!(definition.strict, Some(true));
        assert!(definition.input_schema["properties"]["a"].is_object());
        assert!(!AddTool.return_direct());
    }

    #[tokio::test]
    async fn test_schema_tool_execute() {
        let output = AddTool
            .execute(serde_json::json!({"a": 2, "b": 3}), &context())
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::success("5"));

        let err = AddTool
            .execute(serde_json::json!({"a": "two"}), &context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }
}
