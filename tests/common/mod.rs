//! Shared fakes for integration tests: a scripted chat model and spy tools.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agent_middleware::structured::ProviderFormat;
use agent_middleware::{
    ChatModel, FnTool, Message, ModelCallOptions, ModelError, Result, Tool, ToolCall, ToolChoice,
    ToolError, ToolOutput,
};
use async_trait::async_trait;
use serde_json::{Value, json};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the model saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ProviderFormat>,
    pub at: tokio::time::Instant,
}

/// A chat model that replays scripted replies and records every request.
///
/// Once the script runs out it repeats the `looping` reply if one is set,
/// otherwise it answers `"done"`.
#[derive(Default)]
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<std::result::Result<Message, ModelError>>>,
    looping: Option<Message>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            name: "scripted".to_string(),
            ..Default::default()
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn reply(self, message: Message) -> Self {
        self.script.lock().unwrap().push_back(Ok(message));
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.reply(Message::assistant(text))
    }

    pub fn fail(self, kind: &str, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ModelError::new(kind, message)));
        self
    }

    pub fn fail_times(mut self, n: usize, kind: &str) -> Self {
        for i in 0..n {
            self = self.fail(kind, &format!("failure {}", i + 1));
        }
        self
    }

    pub fn looping(mut self, message: Message) -> Self {
        self.looping = Some(message);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, messages: &[Message], options: &ModelCallOptions) -> Result<Message> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            tools: options.tools.iter().map(|t| t.name.clone()).collect(),
            tool_choice: options.tool_choice.clone(),
            response_format: options.response_format.clone(),
            at: tokio::time::Instant::now(),
        });
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(message)) => Ok(message),
            Some(Err(error)) => Err(error.into()),
            None => Ok(self
                .looping
                .clone()
                .unwrap_or_else(|| Message::assistant("done"))),
        }
    }
}

/// Model that always fails with `kind`.
pub struct FailingModel {
    pub kind: String,
    pub calls: AtomicUsize,
}

impl FailingModel {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for FailingModel {
    async fn invoke(&self, _: &[Message], _: &ModelCallOptions) -> Result<Message> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(ModelError::new(&self.kind, format!("call {n} failed")).into())
    }
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

/// Assistant message requesting the given tool calls.
pub fn ai_calls(calls: Vec<ToolCall>) -> Message {
    Message::assistant_with_tool_calls("", calls)
}

pub fn ai_call(id: &str, name: &str) -> Message {
    ai_calls(vec![call(id, name, json!({}))])
}

/// A tool that answers `"<name> result"` and counts its invocations.
pub fn spy_tool(name: &str) -> (Arc<dyn Tool>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let reply = format!("{name} result");
    let tool = FnTool::new(
        name,
        format!("spy tool {name}"),
        json!({"type": "object"}),
        move |_, _| {
            let counter = counter.clone();
            let reply = reply.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ToolOutput::success(reply))
            }
        },
    );
    (Arc::new(tool), count)
}

/// A tool that fails `failures` times before succeeding.
pub fn flaky_tool(name: &str, failures: usize) -> (Arc<dyn Tool>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let tool = FnTool::new(name, "flaky", json!({"type": "object"}), move |_, _| {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(ToolError::execution_failed(format!("attempt {n} broke")))
            } else {
                Ok(ToolOutput::success("recovered"))
            }
        }
    });
    (Arc::new(tool), count)
}
