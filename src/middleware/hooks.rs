//! Node hooks and the outcomes they return.

use std::future::Future;

use async_trait::async_trait;

use crate::Result;
use crate::agent::Runtime;
use crate::types::{AgentState, JumpTarget, Message, StatePatch};

/// What a node hook asks the loop to do next.
///
/// Jumps and terminations are explicit values; returning `Err` is reserved
/// for failures and always rejects the whole run.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Apply the patch and run the next hook.
    Continue(StatePatch),
    /// Apply the patch, skip the rest of the phase, and continue at `target`.
    Jump(JumpTarget, StatePatch),
    /// Stop the run with [`crate::Error::Terminated`].
    Terminate(String),
}

impl Default for HookOutcome {
    fn default() -> Self {
        HookOutcome::Continue(StatePatch::default())
    }
}

impl HookOutcome {
    /// Nothing to change.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn patch(patch: StatePatch) -> Self {
        HookOutcome::Continue(patch)
    }

    pub fn jump(target: JumpTarget) -> Self {
        HookOutcome::Jump(target, StatePatch::default())
    }

    pub fn jump_with(target: JumpTarget, patch: StatePatch) -> Self {
        HookOutcome::Jump(target, patch)
    }

    /// Jump to `end` after appending `message`.
    pub fn end_with_message(message: Message) -> Self {
        HookOutcome::Jump(JumpTarget::End, StatePatch::new().append_message(message))
    }

    pub fn terminate(reason: impl Into<String>) -> Self {
        HookOutcome::Terminate(reason.into())
    }

    pub fn jump_target(&self) -> Option<JumpTarget> {
        match self {
            HookOutcome::Jump(target, _) => Some(*target),
            _ => None,
        }
    }
}

impl From<StatePatch> for HookOutcome {
    fn from(patch: StatePatch) -> Self {
        HookOutcome::Continue(patch)
    }
}

/// A `before_agent`, `before_model`, `after_model`, or `after_agent` hook.
#[async_trait]
pub trait NodeHook: Send + Sync {
    async fn run(&self, state: &AgentState, runtime: &Runtime) -> Result<HookOutcome>;
}

pub struct FnHook<F>(F);

/// Build a [`NodeHook`] from an async closure over owned copies of the state
/// and runtime.
pub fn hook_fn<F, Fut>(f: F) -> FnHook<F>
where
    F: Fn(AgentState, Runtime) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookOutcome>> + Send,
{
    FnHook(f)
}

#[async_trait]
impl<F, Fut> NodeHook for FnHook<F>
where
    F: Fn(AgentState, Runtime) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookOutcome>> + Send,
{
    async fn run(&self, state: &AgentState, runtime: &Runtime) -> Result<HookOutcome> {
        (self.0)(state.clone(), runtime.clone()).await
    }
}
