//! Control-flow directives: jump targets and tool commands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::StatePatch;

/// Named step a hook may ask the loop to continue with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpTarget {
    Model,
    Tools,
    End,
}

impl JumpTarget {
    pub const ALL: [JumpTarget; 3] = [JumpTarget::Model, JumpTarget::Tools, JumpTarget::End];

    pub fn as_str(&self) -> &'static str {
        match self {
            JumpTarget::Model => "model",
            JumpTarget::Tools => "tools",
            JumpTarget::End => "end",
        }
    }
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JumpTarget {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(JumpTarget::Model),
            "tools" => Ok(JumpTarget::Tools),
            "end" => Ok(JumpTarget::End),
            other => Err(crate::Error::config(format!(
                "Unknown jump target '{other}', expected one of: model, tools, end"
            ))),
        }
    }
}

/// Result a `wrap_tool_call` hook may return in place of a tool message.
///
/// The update is applied to the agent state as-is, so a command that should
/// answer the tool call must append its own tool message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub update: StatePatch,
    pub goto: Option<JumpTarget>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update(mut self, update: StatePatch) -> Self {
        self.update = update;
        self
    }

    pub fn goto(mut self, target: JumpTarget) -> Self {
        self.goto = Some(target);
        self
    }
}
