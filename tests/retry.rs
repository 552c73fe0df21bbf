//! Retry Tests
//!
//! Model and tool retry middleware, backoff timing, and the agent-level
//! model retry policy. Timing tests run on tokio's paused clock.
//!
//! Run: cargo nextest run --test retry

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agent_middleware::middleware::{ModelRetryMiddleware, ToolRetryMiddleware, retry_request_fn};
use agent_middleware::{
    AgentState, Error, InvokeOptions, Message, MiddlewareDefinition, ModelRequest, OnFailure,
    RetryOn, RetryPolicy, create_agent,
};
use common::{FailingModel, ScriptedModel, ai_call, flaky_tool};
use tokio_util::sync::CancellationToken;

fn input(text: &str) -> AgentState {
    AgentState::from_messages(vec![Message::user(text)])
}

fn model_retry(max_retries: u32) -> ModelRetryMiddleware {
    ModelRetryMiddleware::new()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::from_millis(100))
        .with_jitter(false)
}

fn gaps(model: &ScriptedModel) -> Vec<Duration> {
    model
        .calls()
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect()
}

// =============================================================================
// Model retry
// =============================================================================

mod model_retry_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let model = ScriptedModel::new()
            .fail_times(2, "RateLimitError")
            .text("finally")
            .into_arc();
        let agent = create_agent(model.clone())
            .middleware(model_retry(2))
            .build()
            .unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(model.call_count(), 3);
        assert_eq!(state.last_message().unwrap().text(), "finally");
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_after_exhaustion() {
        let model = Arc::new(FailingModel::new("RateLimitError"));
        let agent = create_agent(model.clone())
            .middleware(model_retry(2).with_on_failure(OnFailure::Raise))
            .build()
            .unwrap();

        let err = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap_err();

        assert!(matches!(err, Error::Model(ref e) if e.kind == "RateLimitError"));
        assert_eq!(model.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_becomes_message() {
        let model = Arc::new(FailingModel::new("RateLimitError"));
        let agent = create_agent(model.clone())
            .middleware(model_retry(2))
            .build()
            .unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(model.count(), 3);
        assert_eq!(
            state.last_message().unwrap().text(),
            "Model call failed after 3 attempts with RateLimitError: call 3 failed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_delays() {
        let model = ScriptedModel::new()
            .fail_times(3, "ServiceUnavailable")
            .text("ok")
            .into_arc();
        let agent = create_agent(model.clone())
            .middleware(model_retry(3).with_backoff_factor(2.0))
            .build()
            .unwrap();

        agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(
            gaps(&model),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_factor_keeps_delay_constant() {
        let model = ScriptedModel::new()
            .fail_times(3, "ServiceUnavailable")
            .text("ok")
            .into_arc();
        let agent = create_agent(model.clone())
            .middleware(model_retry(3).with_backoff_factor(0.0))
            .build()
            .unwrap();

        agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(gaps(&model), vec![Duration::from_millis(100); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_at_max() {
        let model = ScriptedModel::new()
            .fail_times(3, "ServiceUnavailable")
            .text("ok")
            .into_arc();
        let agent = create_agent(model.clone())
            .middleware(model_retry(3).with_max_delay(Duration::from_millis(150)))
            .build()
            .unwrap();

        agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(
            gaps(&model),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(150),
                Duration::from_millis(150),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_kind_not_retried() {
        let model = Arc::new(FailingModel::new("AuthenticationError"));
        let agent = create_agent(model.clone())
            .middleware(
                model_retry(3)
                    .with_retry_on(RetryOn::kinds(["RateLimitError"]))
                    .with_on_failure(OnFailure::Raise),
            )
            .build()
            .unwrap();

        let err = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap_err();

        assert_eq!(err.kind(), "AuthenticationError");
        assert_eq!(model.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_failure_formatter() {
        let model = Arc::new(FailingModel::new("RateLimitError"));
        let agent = create_agent(model)
            .middleware(
                model_retry(1)
                    .with_on_failure(OnFailure::custom(|e| Ok(format!("gave up on {}", e.kind())))),
            )
            .build()
            .unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();
        assert_eq!(state.last_message().unwrap().text(), "gave up on RateLimitError");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retries() {
        let model = Arc::new(FailingModel::new("RateLimitError"));
        let agent = create_agent(model.clone())
            .middleware(model_retry(5).with_backoff_factor(2.0))
            .build()
            .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let err = agent
            .invoke(input("hi"), InvokeOptions::new().with_cancellation(token))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(model.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_consulted_once_after_retries_exhausted() {
        let primary = Arc::new(FailingModel::new("RateLimitError"));
        let backup = ScriptedModel::named("backup").text("from backup").into_arc();
        let consulted = Arc::new(AtomicUsize::new(0));
        let attempts_seen = Arc::new(AtomicUsize::new(0));
        let fallback = {
            let primary = primary.clone();
            let backup = backup.clone();
            let consulted = consulted.clone();
            let attempts_seen = attempts_seen.clone();
            MiddlewareDefinition::new("fallback").retry_model_request(retry_request_fn(
                move |_: &Error, request: ModelRequest| {
                    consulted.fetch_add(1, Ordering::SeqCst);
                    attempts_seen.store(primary.count(), Ordering::SeqCst);
                    let backup = backup.clone();
                    async move { Ok(Some(request.with_model(backup))) }
                },
            ))
        };
        let agent = create_agent(primary.clone())
            .middleware(model_retry(2).with_on_failure(OnFailure::Raise))
            .middleware(fallback)
            .build()
            .unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(primary.count(), 3);
        assert_eq!(consulted.load(Ordering::SeqCst), 1);
        assert_eq!(attempts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(backup.call_count(), 1);
        assert_eq!(state.last_message().unwrap().text(), "from backup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_returned_failure_message_skips_fallback() {
        let primary = Arc::new(FailingModel::new("RateLimitError"));
        let consulted = Arc::new(AtomicUsize::new(0));
        let fallback = {
            let consulted = consulted.clone();
            MiddlewareDefinition::new("fallback").retry_model_request(retry_request_fn(
                move |_: &Error, request: ModelRequest| {
                    consulted.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(Some(request)) }
                },
            ))
        };
        let agent = create_agent(primary.clone())
            .middleware(model_retry(1))
            .middleware(fallback)
            .build()
            .unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(primary.count(), 2);
        assert_eq!(consulted.load(Ordering::SeqCst), 0);
        assert!(state.last_message().unwrap().text().starts_with("Model call failed after 2 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_level_policy() {
        let model = ScriptedModel::new()
            .fail_times(1, "ServiceUnavailable")
            .text("ok")
            .into_arc();
        let agent = create_agent(model.clone())
            .model_retry(
                RetryPolicy::new()
                    .with_max_retries(1)
                    .with_initial_delay(Duration::from_millis(50))
                    .with_jitter(false),
            )
            .build()
            .unwrap();

        let state = agent.invoke(input("hi"), InvokeOptions::default()).await.unwrap();

        assert_eq!(model.call_count(), 2);
        assert_eq!(gaps(&model), vec![Duration::from_millis(50)]);
        assert_eq!(state.last_message().unwrap().text(), "ok");
    }
}

// =============================================================================
// Tool retry
// =============================================================================

mod tool_retry_tests {
    use super::*;

    fn tool_retry(max_retries: u32) -> ToolRetryMiddleware {
        ToolRetryMiddleware::new()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_tool_recovers() {
        let (flaky, count) = flaky_tool("flaky", 2);
        let model = ScriptedModel::new().reply(ai_call("f1", "flaky")).into_arc();
        let agent = create_agent(model)
            .tool_arc(flaky)
            .middleware(tool_retry(2))
            .build()
            .unwrap();

        let state = agent.invoke(input("go"), InvokeOptions::default()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        let reply = state.messages.iter().find(|m| m.is_tool()).unwrap();
        assert_eq!(reply.text(), "recovered");
        assert!(!reply.is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_becomes_tool_error() {
        let (flaky, count) = flaky_tool("flaky", 10);
        let model = ScriptedModel::new().reply(ai_call("f1", "flaky")).into_arc();
        let agent = create_agent(model.clone())
            .tool_arc(flaky)
            .middleware(tool_retry(2))
            .build()
            .unwrap();

        let state = agent.invoke(input("go"), InvokeOptions::default()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
        let reply = state.messages.iter().find(|m| m.is_tool()).unwrap();
        assert!(reply.is_error());
        assert_eq!(
            reply.text(),
            "Tool 'flaky' failed after 3 attempts with ExecutionFailed: attempt 3 broke"
        );
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlisted_tool_not_retried() {
        let (flaky, count) = flaky_tool("flaky", 1);
        let model = ScriptedModel::new().reply(ai_call("f1", "flaky")).into_arc();
        let agent = create_agent(model)
            .tool_arc(flaky)
            .middleware(tool_retry(3).with_tools(["other"]))
            .build()
            .unwrap();

        let state = agent.invoke(input("go"), InvokeOptions::default()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let reply = state.messages.iter().find(|m| m.is_tool()).unwrap();
        assert!(reply.is_error());
        assert!(reply.text().contains("attempt 1 broke"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raise_hands_last_error_to_model() {
        let (flaky, count) = flaky_tool("flaky", 10);
        let model = ScriptedModel::new().reply(ai_call("f1", "flaky")).into_arc();
        let agent = create_agent(model)
            .tool_arc(flaky)
            .middleware(tool_retry(1).with_on_failure(OnFailure::Raise))
            .build()
            .unwrap();

        let state = agent.invoke(input("go"), InvokeOptions::default()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
        let reply = state.messages.iter().find(|m| m.is_tool()).unwrap();
        assert_eq!(
            reply.text(),
            "Error: execution failed: attempt 2 broke\n Please fix your mistakes."
        );
    }
}
