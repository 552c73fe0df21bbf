use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::ChatModel;
use crate::agent::Runtime;
use crate::tools::Tool;
use crate::types::{AgentState, Message, ToolChoice, ToolDefinition};

/// Snapshot passed through the model invocation chain.
#[derive(Clone)]
pub struct ModelRequest {
    pub model: Arc<dyn ChatModel>,
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub state: Arc<AgentState>,
    pub runtime: Runtime,
}

impl ModelRequest {
    pub fn with_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = model;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    /// Messages as sent to the model, with the system prompt in front.
    pub fn model_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }
}

impl fmt::Debug for ModelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRequest")
            .field("model", &self.model.name())
            .field("messages", &self.messages.len())
            .field("system_prompt", &self.system_prompt)
            .field("tools", &self.tool_names())
            .field("tool_choice", &self.tool_choice)
            .finish()
    }
}

/// Result of the model invocation chain.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    /// Messages to append to the conversation; the model reply comes first.
    pub messages: Vec<Message>,
    pub structured_response: Option<Value>,
    /// The structured output strategy rejected the reply and the model must
    /// be called again.
    pub repair: bool,
}

impl ModelResponse {
    pub fn from_message(message: Message) -> Self {
        Self {
            messages: vec![message],
            structured_response: None,
            repair: false,
        }
    }

    /// The model's own reply.
    pub fn message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_ai())
    }
}
