//! Core data types for the agent loop.

mod command;
mod message;
mod state;
mod tool;

pub use command::{Command, JumpTarget};
pub use message::{Message, Role, ToolCall, ToolStatus};
pub use state::{AgentState, MESSAGES_KEY, MessagesUpdate, STRUCTURED_RESPONSE_KEY, StatePatch};
pub use tool::{ToolChoice, ToolDefinition};
