//! Agent execution settings.

use crate::config::Settings;

/// Default maximum number of model calls in one invoke.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name used in log fields.
    pub name: String,
    pub system_prompt: Option<String>,
    /// Maximum model calls per invoke; exceeding it fails the run.
    pub recursion_limit: usize,
    /// Run the tool calls of one turn concurrently.
    pub parallel_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            system_prompt: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            parallel_tool_calls: true,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    /// Overlay the values present in `settings`.
    pub fn apply_settings(mut self, settings: &Settings) -> Self {
        if let Some(limit) = settings.recursion_limit {
            self.recursion_limit = limit;
        }
        if let Some(prompt) = &settings.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
        if let Some(parallel) = settings.parallel_tool_calls {
            self.parallel_tool_calls = parallel;
        }
        self
    }
}
