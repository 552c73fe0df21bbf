//! Agent Loop Tests
//!
//! End-to-end runs of the execution loop against a scripted model: tool
//! dispatch, ordering, limits, checkpoints, schemas, and cancellation.
//!
//! Run: cargo nextest run --test agent_loop

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use agent_middleware::{
    AgentState, Checkpointer, Error, FnTool, InvokeOptions, MemoryCheckpointer, Message, Role,
    StateSchema, ToolOutput, TypedValidator, create_agent,
};
use common::{ScriptedModel, ai_call, ai_calls, call, init_tracing, spy_tool};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn input(text: &str) -> AgentState {
    AgentState::from_messages(vec![Message::user(text)])
}

// =============================================================================
// Basic loop
// =============================================================================

mod basic_loop_tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_reply_ends_run() {
        init_tracing();
        let model = ScriptedModel::new().text("hello there").into_arc();
        let agent = create_agent(model.clone()).build().unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(model.call_count(), 1);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.last_ai_message().unwrap().text(), "hello there");
        assert!(state.last_ai_message().unwrap().id.is_some());
    }

    #[tokio::test]
    async fn test_system_prompt_sent_first() {
        let model = ScriptedModel::new().text("ok").into_arc();
        let agent = create_agent(model.clone())
            .system_prompt("You are terse.")
            .build()
            .unwrap();

        agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        let seen = &model.calls()[0].messages;
        assert_eq!(seen[0].role, Role::System);
        assert_eq!(seen[0].text(), "You are terse.");
        assert_eq!(seen[1].text(), "hi");
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let (search, count) = spy_tool("search");
        let model = ScriptedModel::new()
            .reply(ai_call("call_1", "search"))
            .text("found it")
            .into_arc();
        let agent = create_agent(model.clone()).tool_arc(search).build().unwrap();

        let state = agent.invoke(input("look"), InvokeOptions::default()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(model.call_count(), 2);
        let tool_message = &state.messages[2];
        assert!(tool_message.is_tool());
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.text(), "search result");
        assert_eq!(model.calls()[0].tools, vec!["search"]);
        assert_eq!(model.calls()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_parallel_results_keep_call_order() {
        let slow = FnTool::new("slow", "sleeps", json!({}), |_, _| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(ToolOutput::success("slow done"))
        });
        let (fast, _) = spy_tool("fast");
        let model = ScriptedModel::new()
            .reply(ai_calls(vec![
                call("a", "slow", json!({})),
                call("b", "fast", json!({})),
            ]))
            .text("both done")
            .into_arc();
        let agent = create_agent(model).tool(slow).tool_arc(fast).build().unwrap();

        let state = agent.invoke(input("go"), InvokeOptions::default()).await.unwrap();

        let ids: Vec<_> = state
            .messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_sequential_tool_calls() {
        let (first, first_count) = spy_tool("first");
        let (second, second_count) = spy_tool("second");
        let model = ScriptedModel::new()
            .reply(ai_calls(vec![
                call("1", "first", json!({})),
                call("2", "second", json!({})),
            ]))
            .into_arc();
        let agent = create_agent(model)
            .tool_arc(first)
            .tool_arc(second)
            .parallel_tool_calls(false)
            .build()
            .unwrap();

        agent.invoke(input("go"), InvokeOptions::default()).await.unwrap();

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_return_direct_tool_ends_loop() {
        let lookup = FnTool::new("lookup", "final answer", json!({}), |_, _| async {
            Ok(ToolOutput::success("42"))
        })
        .with_return_direct(true);
        let model = ScriptedModel::new().reply(ai_call("c", "lookup")).into_arc();
        let agent = create_agent(model.clone()).tool(lookup).build().unwrap();

        let state = agent.invoke(input("answer?"), InvokeOptions::default()).await.unwrap();

        assert_eq!(model.call_count(), 1);
        assert_eq!(state.last_message().unwrap().text(), "42");
    }
}

// =============================================================================
// Tool failures
// =============================================================================

mod tool_failure_tests {
    use super::*;
    use agent_middleware::ToolError;

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let (search, _) = spy_tool("search");
        let model = ScriptedModel::new()
            .reply(ai_call("x", "missing"))
            .text("sorry")
            .into_arc();
        let agent = create_agent(model.clone()).tool_arc(search).build().unwrap();

        let state = agent.invoke(input("q"), InvokeOptions::default()).await.unwrap();

        let error = &state.messages[2];
        assert!(error.is_error());
        assert_eq!(
            error.text(),
            "Error: missing is not a valid tool, try one of [search]."
        );
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_tool_error_does_not_abort_loop() {
        let broken = FnTool::new("broken", "fails", json!({}), |_, _| async {
            Err(ToolError::execution_failed("disk full"))
        });
        let model = ScriptedModel::new()
            .reply(ai_call("b1", "broken"))
            .text("recovered")
            .into_arc();
        let agent = create_agent(model).tool(broken).build().unwrap();

        let state = agent.invoke(input("q"), InvokeOptions::default()).await.unwrap();

        let error = &state.messages[2];
        assert!(error.is_error());
        assert!(error.text().contains("disk full"));
        assert_eq!(state.last_ai_message().unwrap().text(), "recovered");
    }
}

// =============================================================================
// Limits and cancellation
// =============================================================================

mod limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_recursion_limit_is_fatal() {
        let (search, count) = spy_tool("search");
        let model = ScriptedModel::new()
            .looping(ai_call("again", "search"))
            .into_arc();
        let agent = create_agent(model.clone())
            .tool_arc(search)
            .recursion_limit(3)
            .build()
            .unwrap();

        let err = agent.invoke(input("loop"), InvokeOptions::default()).await.unwrap_err();

        assert!(matches!(err, Error::RecursionLimit { limit: 3 }));
        assert_eq!(model.call_count(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recursion_limit_override_per_call() {
        let (search, _) = spy_tool("search");
        let model = ScriptedModel::new()
            .looping(ai_call("again", "search"))
            .into_arc();
        let agent = create_agent(model.clone()).tool_arc(search).build().unwrap();

        let err = agent
            .invoke(input("loop"), InvokeOptions::new().with_recursion_limit(1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RecursionLimit { limit: 1 }));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let model = ScriptedModel::new().text("never").into_arc();
        let agent = create_agent(model.clone()).build().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = agent
            .invoke(input("hi"), InvokeOptions::new().with_cancellation(token))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let hang = FnTool::new("hang", "never returns", json!({}), move |_, _| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                std::future::pending::<()>().await;
                Ok(ToolOutput::empty())
            }
        });
        let model = ScriptedModel::new().reply(ai_call("h", "hang")).into_arc();
        let agent = create_agent(model).tool(hang).build().unwrap();

        let err = agent
            .invoke(input("hi"), InvokeOptions::new().with_cancellation(token))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
    }
}

// =============================================================================
// State and context schemas
// =============================================================================

mod schema_tests {
    use super::*;
    use agent_middleware::middleware::hook_fn;
    use agent_middleware::{HookOutcome, MiddlewareDefinition, StatePatch};

    #[tokio::test]
    async fn test_defaults_applied_and_patches_validated() {
        let counter = MiddlewareDefinition::new("counter")
            .with_state_schema(
                StateSchema::new().field("visits", TypedValidator::<u32>::new().with_default(10)),
            )
            .before_agent(hook_fn(|state, _| async move {
                let visits = state.get_as::<u32>("visits").unwrap_or(0);
                Ok(StatePatch::new().set("visits", json!(visits + 1)).into())
            }));
        let model = ScriptedModel::new().text("ok").into_arc();
        let agent = create_agent(model).middleware(counter).build().unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();
        assert_eq!(state.get("visits"), Some(&json!(11)));
    }

    #[tokio::test]
    async fn test_invalid_initial_value_rejected() {
        let model = ScriptedModel::new().into_arc();
        let agent = create_agent(model.clone())
            .state_schema(StateSchema::new().field("budget", TypedValidator::<u32>::new()))
            .build()
            .unwrap();

        let err = agent
            .invoke(
                input("hi").with_value("budget", json!("lots")),
                InvokeOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StateValidation { ref field, .. } if field == "budget"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_patch_rejects_run() {
        let bad = MiddlewareDefinition::new("bad")
            .with_state_schema(StateSchema::new().field("level", TypedValidator::<u8>::new()))
            .before_model(hook_fn(|_, _| async {
                Ok(HookOutcome::patch(StatePatch::new().set("level", json!(-1))))
            }));
        let model = ScriptedModel::new().into_arc();
        let agent = create_agent(model.clone()).middleware(bad).build().unwrap();

        let err = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap_err();

        assert!(matches!(err, Error::StateValidation { .. }));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_context_visible_to_hooks() {
        let greeter = MiddlewareDefinition::new("greeter")
            .with_context_schema(
                StateSchema::new()
                    .field("user", TypedValidator::<String>::new())
                    .field("tier", TypedValidator::<u32>::new().with_default(1)),
            )
            .before_agent(hook_fn(|_, runtime| async move {
                let user = runtime.context_as::<String>("user").unwrap_or_default();
                let tier = runtime.context_as::<u32>("tier").unwrap_or_default();
                Ok(StatePatch::new()
                    .set("greeting", json!(format!("{user}@{tier}")))
                    .into())
            }));
        let model = ScriptedModel::new().text("ok").into_arc();
        let agent = create_agent(model).middleware(greeter).build().unwrap();

        let state = agent
            .invoke(input("hi"), InvokeOptions::new().with_context("user", json!("ana")))
            .await
            .unwrap();
        assert_eq!(state.get("greeting"), Some(&json!("ana@1")));

        let err = agent
            .invoke(input("hi"), InvokeOptions::new().with_context("user", json!(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateValidation { .. }));
    }
}

// =============================================================================
// Checkpointing
// =============================================================================

mod checkpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_thread_resumes_from_checkpoint() {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let model = ScriptedModel::new()
            .text("first answer")
            .text("second answer")
            .into_arc();
        let agent = create_agent(model.clone())
            .checkpointer(checkpointer.clone())
            .build()
            .unwrap();
        let options = InvokeOptions::new().with_thread_id("thread-1");

        agent.invoke(input("first"), options.clone()).await.unwrap();
        let state = agent.invoke(input("second"), options).await.unwrap();

        assert_eq!(state.messages.len(), 4);
        assert_eq!(model.calls()[1].messages.len(), 3);
        let saved = checkpointer.load("thread-1").await.unwrap().unwrap();
        assert_eq!(saved.state, state);
        assert_eq!(checkpointer.list().await.unwrap(), vec!["thread-1"]);
    }

    #[tokio::test]
    async fn test_no_thread_id_no_checkpoint() {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let model = ScriptedModel::new().text("ok").into_arc();
        let agent = create_agent(model)
            .checkpointer(checkpointer.clone())
            .build()
            .unwrap();

        agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(checkpointer.count().await, 0);
    }
}
