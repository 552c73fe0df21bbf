//! Middleware definitions.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::hooks::NodeHook;
use crate::model::{RetryModelRequest, WrapModelCall};
use crate::schema::StateSchema;
use crate::tools::{Tool, WrapToolCall};
use crate::types::JumpTarget;

/// A node phase of the agent loop that runs middleware hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeAgent,
    BeforeModel,
    AfterModel,
    AfterAgent,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::BeforeAgent,
        Phase::BeforeModel,
        Phase::AfterModel,
        Phase::AfterAgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeAgent => "beforeAgent",
            Phase::BeforeModel => "beforeModel",
            Phase::AfterModel => "afterModel",
            Phase::AfterAgent => "afterAgent",
        }
    }

    /// Targets a hook of this phase may ever be granted. `before_model`
    /// cannot jump to `model`, which would skip itself.
    pub fn legal_targets(&self) -> &'static [JumpTarget] {
        match self {
            Phase::BeforeModel => &[JumpTarget::Tools, JumpTarget::End],
            Phase::BeforeAgent | Phase::AfterModel | Phase::AfterAgent => &JumpTarget::ALL,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named bundle of hooks, schema fragments, and tools.
///
/// Absent hooks are no-ops. Definitions are cheap to clone; every part is
/// shared behind an `Arc`.
///
/// ```rust,ignore
/// let audit = MiddlewareDefinition::new("audit")
///     .with_state_schema(StateSchema::new().field("seen", TypedValidator::<u32>::defaulted()))
///     .before_model(hook_fn(|state, _| async move { Ok(HookOutcome::none()) }))
///     .can_jump_to(Phase::AfterModel, [JumpTarget::End]);
/// ```
#[derive(Clone)]
pub struct MiddlewareDefinition {
    pub(crate) name: String,
    pub(crate) state_schema: StateSchema,
    pub(crate) context_schema: StateSchema,
    pub(crate) tools: Vec<Arc<dyn Tool>>,
    pub(crate) node_hooks: HashMap<Phase, Arc<dyn NodeHook>>,
    pub(crate) wrap_model_call: Option<Arc<dyn WrapModelCall>>,
    pub(crate) wrap_tool_call: Option<Arc<dyn WrapToolCall>>,
    pub(crate) retry_model_request: Option<Arc<dyn RetryModelRequest>>,
    pub(crate) jump_permissions: HashMap<Phase, BTreeSet<JumpTarget>>,
}

impl MiddlewareDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state_schema: StateSchema::default(),
            context_schema: StateSchema::default(),
            tools: Vec::new(),
            node_hooks: HashMap::new(),
            wrap_model_call: None,
            wrap_tool_call: None,
            retry_model_request: None,
            jump_permissions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn state_schema(&self) -> &StateSchema {
        &self.state_schema
    }

    pub fn context_schema(&self) -> &StateSchema {
        &self.context_schema
    }

    pub fn hook(&self, phase: Phase) -> Option<&Arc<dyn NodeHook>> {
        self.node_hooks.get(&phase)
    }

    /// Declared jump targets for `phase`, in `model, tools, end` order.
    pub fn jump_permissions(&self, phase: Phase) -> Option<&BTreeSet<JumpTarget>> {
        self.jump_permissions.get(&phase)
    }

    pub fn with_state_schema(mut self, schema: StateSchema) -> Self {
        self.state_schema = schema;
        self
    }

    /// Fields of the read-only runtime context this middleware expects.
    pub fn with_context_schema(mut self, schema: StateSchema) -> Self {
        self.context_schema = schema;
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn on(mut self, phase: Phase, hook: impl NodeHook + 'static) -> Self {
        self.node_hooks.insert(phase, Arc::new(hook));
        self
    }

    pub fn before_agent(self, hook: impl NodeHook + 'static) -> Self {
        self.on(Phase::BeforeAgent, hook)
    }

    pub fn before_model(self, hook: impl NodeHook + 'static) -> Self {
        self.on(Phase::BeforeModel, hook)
    }

    pub fn after_model(self, hook: impl NodeHook + 'static) -> Self {
        self.on(Phase::AfterModel, hook)
    }

    pub fn after_agent(self, hook: impl NodeHook + 'static) -> Self {
        self.on(Phase::AfterAgent, hook)
    }

    pub fn wrap_model_call(mut self, hook: impl WrapModelCall + 'static) -> Self {
        self.wrap_model_call = Some(Arc::new(hook));
        self
    }

    pub fn wrap_tool_call(mut self, hook: impl WrapToolCall + 'static) -> Self {
        self.wrap_tool_call = Some(Arc::new(hook));
        self
    }

    pub fn retry_model_request(mut self, hook: impl RetryModelRequest + 'static) -> Self {
        self.retry_model_request = Some(Arc::new(hook));
        self
    }

    /// Grant the `phase` hook permission to jump to `targets`. Repeated calls
    /// for the same phase accumulate.
    pub fn can_jump_to(
        mut self,
        phase: Phase,
        targets: impl IntoIterator<Item = JumpTarget>,
    ) -> Self {
        self.jump_permissions.entry(phase).or_default().extend(targets);
        self
    }
}

impl fmt::Debug for MiddlewareDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut phases: Vec<&str> = Phase::ALL
            .iter()
            .filter(|p| self.node_hooks.contains_key(*p))
            .map(Phase::as_str)
            .collect();
        if self.wrap_model_call.is_some() {
            phases.push("wrapModelCall");
        }
        if self.wrap_tool_call.is_some() {
            phases.push("wrapToolCall");
        }
        if self.retry_model_request.is_some() {
            phases.push("retryModelRequest");
        }
        f.debug_struct("MiddlewareDefinition")
            .field("name", &self.name)
            .field("hooks", &phases)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("state_schema", &self.state_schema)
            .finish()
    }
}
