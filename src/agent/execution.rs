//! The agent loop: a state machine over the phases of one invoke.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::executor::Agent;
use super::runtime::Runtime;
use crate::checkpoint::Checkpoint;
use crate::middleware::{HookOutcome, Phase};
use crate::model::ModelRequest;
use crate::tools::{ToolCallRequest, ToolCallResult};
use crate::types::{AgentState, Command, JumpTarget, STRUCTURED_RESPONSE_KEY, StatePatch, ToolCall};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    BeforeAgent,
    BeforeModel,
    ModelCall,
    AfterModel,
    ToolExecution,
    AfterAgent,
    End,
}

/// Counters reported when a run completes.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct RunStats {
    pub model_calls: usize,
    pub tool_calls: usize,
    pub steps: usize,
}

pub(super) struct Execution<'a> {
    agent: &'a Agent,
    runtime: Runtime,
    recursion_limit: usize,
    state: AgentState,
    stats: RunStats,
    /// The structured output strategy rejected the last reply.
    repair_pending: bool,
    /// The last reply produced a structured response.
    resolved: bool,
}

impl<'a> Execution<'a> {
    pub(super) fn new(
        agent: &'a Agent,
        runtime: Runtime,
        recursion_limit: usize,
        state: AgentState,
    ) -> Self {
        Self {
            agent,
            runtime,
            recursion_limit,
            state,
            stats: RunStats::default(),
            repair_pending: false,
            resolved: false,
        }
    }

    pub(super) async fn run(mut self) -> Result<(AgentState, RunStats)> {
        let mut step = Step::BeforeAgent;
        loop {
            if self.runtime.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!(step = ?step, "entering step");

            step = match step {
                Step::BeforeAgent => self
                    .run_phase(Phase::BeforeAgent)
                    .await?
                    .unwrap_or(Step::BeforeModel),
                Step::BeforeModel => self
                    .run_phase(Phase::BeforeModel)
                    .await?
                    .unwrap_or(Step::ModelCall),
                Step::ModelCall => {
                    self.call_model().await?;
                    Step::AfterModel
                }
                Step::AfterModel => {
                    let next = match self.run_phase(Phase::AfterModel).await? {
                        Some(next) => next,
                        None => self.route_after_model(),
                    };
                    self.save_checkpoint().await?;
                    next
                }
                Step::ToolExecution => {
                    let next = self.execute_tools().await?;
                    self.save_checkpoint().await?;
                    next
                }
                Step::AfterAgent => self
                    .run_phase(Phase::AfterAgent)
                    .await?
                    .unwrap_or(Step::End),
                Step::End => break,
            };
            self.stats.steps += 1;
        }

        self.save_checkpoint().await?;
        Ok((self.state, self.stats))
    }

    /// Run every hook of `phase` in declaration order. Returns the step a
    /// hook jumped to, if any.
    async fn run_phase(&mut self, phase: Phase) -> Result<Option<Step>> {
        let agent = self.agent;
        for bound in agent.pipeline.hooks(phase) {
            debug!(phase = %phase, middleware = %bound.middleware, "running hook");
            match bound.hook.run(&self.state, &self.runtime).await? {
                HookOutcome::Continue(patch) => self.apply(patch)?,
                HookOutcome::Jump(target, patch) => {
                    bound.check_jump(phase, target)?;
                    self.apply(patch)?;
                    debug!(
                        phase = %phase,
                        middleware = %bound.middleware,
                        target = %target,
                        "hook requested jump"
                    );
                    return Ok(Some(self.jump_step(phase, target)));
                }
                HookOutcome::Terminate(reason) => {
                    return Err(Error::Terminated {
                        middleware: bound.middleware.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(None)
    }

    fn jump_step(&self, phase: Phase, target: JumpTarget) -> Step {
        let finish = if phase == Phase::AfterAgent {
            Step::End
        } else {
            Step::AfterAgent
        };
        match target {
            JumpTarget::Model => Step::ModelCall,
            JumpTarget::Tools if !self.pending_tool_calls().is_empty() => Step::ToolExecution,
            JumpTarget::Tools | JumpTarget::End => finish,
        }
    }

    fn apply(&mut self, mut patch: StatePatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.agent.pipeline.state_schema.validate_patch(&mut patch)?;
        self.state.apply(patch);
        Ok(())
    }

    /// Pending calls of the latest reply, excluding structured output
    /// extraction calls.
    fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let format = self.agent.pipeline.response_format.as_deref();
        self.state
            .pending_tool_calls()
            .into_iter()
            .filter(|call| !format.is_some_and(|f| f.is_extraction_tool(&call.name)))
            .collect()
    }

    async fn call_model(&mut self) -> Result<()> {
        if self.stats.model_calls >= self.recursion_limit {
            return Err(Error::RecursionLimit {
                limit: self.recursion_limit,
            });
        }
        self.stats.model_calls += 1;
        self.repair_pending = false;

        let agent = self.agent;
        let request = ModelRequest {
            model: agent.model.clone(),
            messages: self.state.messages.clone(),
            system_prompt: agent.config.system_prompt.clone(),
            tools: agent.pipeline.tools.all().to_vec(),
            tool_choice: None,
            state: Arc::new(self.state.clone()),
            runtime: self.runtime.clone(),
        };
        debug!(
            call = self.stats.model_calls,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "calling model"
        );

        let response = agent.pipeline.model_chain.handle(request).await?;
        if response.repair {
            warn!(call = self.stats.model_calls, "structured output rejected, asking model to repair");
        }
        self.state.messages.extend(response.messages);
        self.resolved = response.structured_response.is_some();
        if let Some(value) = response.structured_response {
            self.state.set(STRUCTURED_RESPONSE_KEY, value);
        }
        self.repair_pending = response.repair;
        Ok(())
    }

    fn route_after_model(&self) -> Step {
        if self.repair_pending {
            Step::ModelCall
        } else if self.resolved {
            Step::AfterAgent
        } else if !self.pending_tool_calls().is_empty() {
            Step::ToolExecution
        } else {
            Step::AfterAgent
        }
    }

    async fn execute_tools(&mut self) -> Result<Step> {
        let agent = self.agent;
        let calls = self.pending_tool_calls();
        if calls.is_empty() {
            return Ok(Step::AfterAgent);
        }
        self.stats.tool_calls += calls.len();

        let snapshot = Arc::new(self.state.clone());
        let requests: Vec<ToolCallRequest> = calls
            .iter()
            .map(|call| ToolCallRequest {
                call: call.clone(),
                tool: agent.pipeline.tools.get(&call.name).cloned(),
                state: snapshot.clone(),
                runtime: self.runtime.clone(),
            })
            .collect();

        let chain = &agent.pipeline.tool_chain;
        debug!(
            count = requests.len(),
            parallel = agent.config.parallel_tool_calls,
            "executing tool calls"
        );
        let results = if agent.config.parallel_tool_calls {
            join_all(requests.into_iter().map(|request| chain.call(request)))
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(chain.call(request).await?);
            }
            results
        };

        for (call, result) in calls.iter().zip(&results) {
            if let ToolCallResult::Command(Command {
                goto: Some(JumpTarget::Tools),
                ..
            }) = result
            {
                return Err(Error::config(format!(
                    "Tool call '{}' returned a command with goto 'tools'; commands may only go to 'model' or 'end'",
                    call.name
                )));
            }
        }

        let mut goto = None;
        for (call, result) in calls.iter().zip(results) {
            match result {
                ToolCallResult::Message(message) => self.state.messages.push(message),
                ToolCallResult::Command(command) => {
                    debug!(tool = %call.name, goto = ?command.goto, "tool returned a command");
                    self.apply(command.update)?;
                    if goto.is_none() {
                        goto = command.goto;
                    }
                }
            }
        }

        let return_direct = calls.iter().any(|call| {
            agent
                .pipeline
                .tools
                .get(&call.name)
                .is_some_and(|tool| tool.return_direct())
        });

        Ok(match goto {
            Some(JumpTarget::Model) => Step::ModelCall,
            Some(_) => Step::AfterAgent,
            None if return_direct => Step::AfterAgent,
            None => Step::BeforeModel,
        })
    }

    async fn save_checkpoint(&self) -> Result<()> {
        let (Some(checkpointer), Some(thread_id)) =
            (&self.agent.checkpointer, self.runtime.thread_id.as_deref())
        else {
            return Ok(());
        };
        checkpointer
            .save(thread_id, &Checkpoint::new(self.stats.steps, self.state.clone()))
            .await?;
        debug!(thread_id, step = self.stats.steps, checkpointer = checkpointer.name(), "checkpoint saved");
        Ok(())
    }
}
