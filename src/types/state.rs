//! Agent state record and sparse patches.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::{Message, ToolCall};

/// Reserved state key for the conversation.
pub const MESSAGES_KEY: &str = "messages";
/// State key the structured output strategy writes its result to.
pub const STRUCTURED_RESPONSE_KEY: &str = "structured_response";

/// Open record threaded through one run: the conversation plus any
/// middleware-declared fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            values: Map::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserialize a field, returning `None` when absent or of the wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn structured_response(&self) -> Option<&Value> {
        self.values
            .get(STRUCTURED_RESPONSE_KEY)
            .filter(|v| !v.is_null())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_ai_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_ai())
    }

    /// Tool calls of the latest assistant message that have no tool message yet.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(idx) = self.messages.iter().rposition(|m| m.is_ai()) else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        self.messages[idx]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect()
    }

    /// Apply a patch without validation.
    pub fn apply(&mut self, patch: StatePatch) {
        match patch.messages {
            Some(MessagesUpdate::Append(messages)) => self.messages.extend(messages),
            Some(MessagesUpdate::Replace(messages)) => self.messages = messages,
            None => {}
        }
        for (key, value) in patch.values {
            self.values.insert(key, value);
        }
    }
}

/// How a patch changes the message list.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagesUpdate {
    Append(Vec<Message>),
    Replace(Vec<Message>),
}

/// Sparse update returned by hooks and commands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub messages: Option<MessagesUpdate>,
    pub values: Map<String, Value>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_message(self, message: Message) -> Self {
        self.append_messages(vec![message])
    }

    pub fn append_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = match self.messages.take() {
            Some(MessagesUpdate::Append(mut existing)) => {
                existing.extend(messages);
                Some(MessagesUpdate::Append(existing))
            }
            Some(MessagesUpdate::Replace(mut existing)) => {
                existing.extend(messages);
                Some(MessagesUpdate::Replace(existing))
            }
            None => Some(MessagesUpdate::Append(messages)),
        };
        self
    }

    pub fn replace_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(MessagesUpdate::Replace(messages));
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_none() && self.values.is_empty()
    }

    /// Fold `other` into `self`; later values win and appends concatenate.
    pub fn merge(mut self, other: StatePatch) -> Self {
        self = match other.messages {
            Some(MessagesUpdate::Append(messages)) => self.append_messages(messages),
            Some(MessagesUpdate::Replace(messages)) => self.replace_messages(messages),
            None => self,
        };
        self.values.extend(other.values);
        self
    }
}
