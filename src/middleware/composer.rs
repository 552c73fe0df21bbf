//! Validates an ordered middleware list and assembles the pipeline an agent
//! runs on every invoke.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::definition::{MiddlewareDefinition, Phase};
use super::hooks::NodeHook;
use crate::model::{ModelHandler, ModelInvoker, RetryModelRequest, WrapModelCall, build_model_chain};
use crate::retry::RetryPolicy;
use crate::schema::{MergedSchema, StateSchema};
use crate::structured::ResponseFormat;
use crate::tools::{Tool, ToolChain, ToolExecutor, ToolRegistry, WrapToolCall, build_tool_chain};
use crate::types::JumpTarget;
use crate::{Error, Result};

/// Owner name used for the agent's own schema fields.
pub(crate) const AGENT_OWNER: &str = "agent";

/// A node hook bound to the middleware that declared it.
pub(crate) struct PhaseHook {
    pub middleware: String,
    pub hook: Arc<dyn NodeHook>,
    pub permissions: Option<BTreeSet<JumpTarget>>,
}

impl PhaseHook {
    /// Check a jump requested by this hook while running in `phase`.
    pub fn check_jump(&self, phase: Phase, target: JumpTarget) -> Result<()> {
        match &self.permissions {
            Some(allowed) if allowed.contains(&target) => Ok(()),
            Some(allowed) if !allowed.is_empty() => Err(Error::DisallowedJump {
                target,
                allowed: allowed
                    .iter()
                    .map(JumpTarget::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            _ => Err(Error::UndeclaredJump {
                target,
                phase,
                middleware: self.middleware.clone(),
            }),
        }
    }
}

/// Agent-level inputs to composition.
#[derive(Default)]
pub(crate) struct ComposeOptions {
    pub tools: Vec<Arc<dyn Tool>>,
    pub state_schema: StateSchema,
    pub context_schema: StateSchema,
    pub response_format: Option<ResponseFormat>,
    pub model_retry: Option<RetryPolicy>,
}

/// Static description of one agent's execution graph, shared read-only by
/// every invoke.
pub(crate) struct Pipeline {
    hooks: HashMap<Phase, Vec<PhaseHook>>,
    pub model_chain: Arc<dyn ModelHandler>,
    pub tool_chain: ToolChain,
    pub tools: ToolRegistry,
    pub state_schema: MergedSchema,
    pub context_schema: MergedSchema,
    pub response_format: Option<Arc<ResponseFormat>>,
    pub middleware: Vec<String>,
}

impl Pipeline {
    pub fn hooks(&self, phase: Phase) -> &[PhaseHook] {
        self.hooks.get(&phase).map(Vec::as_slice).unwrap_or_default()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("middleware", &self.middleware)
            .field("tools", &self.tools)
            .field("state_schema", &self.state_schema)
            .finish_non_exhaustive()
    }
}

pub(crate) fn compose(
    definitions: &[MiddlewareDefinition],
    options: ComposeOptions,
) -> Result<Pipeline> {
    let mut seen = HashSet::new();
    for definition in definitions {
        if !seen.insert(definition.name.as_str()) {
            return Err(Error::DuplicateMiddleware(definition.name.clone()));
        }
        validate_permissions(definition)?;
    }

    let mut tools = ToolRegistry::new();
    for tool in options.tools {
        tools.register(tool)?;
    }
    for definition in definitions {
        for tool in &definition.tools {
            tools.register(tool.clone())?;
        }
    }

    let response_format = options.response_format.map(Arc::new);
    if let Some(format) = &response_format {
        for extraction in format.extraction_tools() {
            if tools.contains(&extraction.name) {
                return Err(Error::DuplicateTool(extraction.name));
            }
        }
    }

    let state_schema = MergedSchema::merge(
        std::iter::once((AGENT_OWNER, &options.state_schema))
            .chain(definitions.iter().map(|d| (d.name.as_str(), &d.state_schema))),
    )?;
    let context_schema = MergedSchema::merge(
        std::iter::once((AGENT_OWNER, &options.context_schema))
            .chain(definitions.iter().map(|d| (d.name.as_str(), &d.context_schema))),
    )?;

    if let Some(policy) = &options.model_retry {
        policy.validate()?;
    }

    let mut hooks: HashMap<Phase, Vec<PhaseHook>> = HashMap::new();
    for phase in Phase::ALL {
        let bound: Vec<PhaseHook> = definitions
            .iter()
            .filter_map(|d| {
                d.hook(phase).map(|hook| PhaseHook {
                    middleware: d.name.clone(),
                    hook: hook.clone(),
                    permissions: d.jump_permissions(phase).cloned(),
                })
            })
            .collect();
        if !bound.is_empty() {
            hooks.insert(phase, bound);
        }
    }

    let model_layers: Vec<(String, Arc<dyn WrapModelCall>)> = definitions
        .iter()
        .filter_map(|d| d.wrap_model_call.clone().map(|h| (d.name.clone(), h)))
        .collect();
    let fallbacks: Vec<(String, Arc<dyn RetryModelRequest>)> = definitions
        .iter()
        .filter_map(|d| d.retry_model_request.clone().map(|h| (d.name.clone(), h)))
        .collect();
    let tool_layers: Vec<(String, Arc<dyn WrapToolCall>)> = definitions
        .iter()
        .filter_map(|d| d.wrap_tool_call.clone().map(|h| (d.name.clone(), h)))
        .collect();

    let invoker = ModelInvoker::new(options.model_retry, response_format.clone());
    let model_chain = build_model_chain(model_layers, fallbacks, invoker);
    let executor = ToolExecutor::new(tools.names().into_iter().map(String::from).collect());
    let tool_chain = build_tool_chain(tool_layers, executor);

    let middleware: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
    debug!(
        middleware = ?middleware,
        tools = tools.len(),
        state_fields = state_schema.len(),
        "pipeline composed"
    );

    Ok(Pipeline {
        hooks,
        model_chain,
        tool_chain,
        tools,
        state_schema,
        context_schema,
        response_format,
        middleware,
    })
}

fn validate_permissions(definition: &MiddlewareDefinition) -> Result<()> {
    for phase in Phase::ALL {
        let Some(targets) = definition.jump_permissions(phase) else {
            continue;
        };
        let legal = phase.legal_targets();
        if let Some(target) = targets.iter().find(|t| !legal.contains(*t)) {
            return Err(Error::config(format!(
                "Middleware '{}' declares {phase}JumpTo '{target}', but {phase} hooks may only jump to: {}",
                definition.name,
                legal.iter().map(JumpTarget::as_str).collect::<Vec<_>>().join(", ")
            )));
        }
    }
    Ok(())
}
