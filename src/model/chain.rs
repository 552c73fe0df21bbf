//! Onion composition of `wrap_model_call` hooks around the model call.
//!
//! The chain is folded once when the pipeline is built. Each layer hands its
//! hook a [`ModelCallNext`] continuation; the continuation checks that the
//! hook did not add or redefine tools before passing the request inward.
//! The innermost handler performs the real call, runs the optional retry
//! policy, then applies the structured output strategy. The
//! `retry_model_request` fallbacks sit outside every layer, so they see a
//! failure only once the whole chain, wrap-layer retries included, gave up.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChatModelExt, ModelCallOptions, ModelRequest, ModelResponse};
use crate::retry::{RetryPolicy, failure_text};
use crate::structured::{ResponseFormat, StructuredOutcome};
use crate::types::{Message, ToolChoice, ToolDefinition};
use crate::{Error, Result};

/// One layer of the model invocation chain.
#[async_trait]
pub trait ModelHandler: Send + Sync {
    async fn handle(&self, request: ModelRequest) -> Result<ModelResponse>;
}

/// Continuation handed to a `wrap_model_call` hook.
#[derive(Clone)]
pub struct ModelCallNext {
    inner: Arc<dyn ModelHandler>,
}

impl ModelCallNext {
    pub(crate) fn new(inner: Arc<dyn ModelHandler>) -> Self {
        Self { inner }
    }

    pub async fn run(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.inner.handle(request).await
    }
}

/// Hook that wraps the model call. It may modify the request, call `next`
/// any number of times, or return its own response without calling it.
#[async_trait]
pub trait WrapModelCall: Send + Sync {
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ModelResponse>;
}

/// Hook consulted when the model call fails for good. Returning a request
/// triggers one more call with it.
#[async_trait]
pub trait RetryModelRequest: Send + Sync {
    async fn retry_model_request(
        &self,
        error: &Error,
        request: &ModelRequest,
    ) -> Result<Option<ModelRequest>>;
}

pub struct WrapModelFn<F>(F);

/// Build a [`WrapModelCall`] from an async closure.
pub fn wrap_model_fn<F, Fut>(f: F) -> WrapModelFn<F>
where
    F: Fn(ModelRequest, ModelCallNext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ModelResponse>> + Send,
{
    WrapModelFn(f)
}

#[async_trait]
impl<F, Fut> WrapModelCall for WrapModelFn<F>
where
    F: Fn(ModelRequest, ModelCallNext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ModelResponse>> + Send,
{
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ModelResponse> {
        (self.0)(request, next).await
    }
}

pub struct RetryRequestFn<F>(F);

/// Build a [`RetryModelRequest`] from a closure. The closure inspects the
/// error synchronously and returns a future producing the replacement.
pub fn retry_request_fn<F, Fut>(f: F) -> RetryRequestFn<F>
where
    F: Fn(&Error, ModelRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ModelRequest>>> + Send,
{
    RetryRequestFn(f)
}

#[async_trait]
impl<F, Fut> RetryModelRequest for RetryRequestFn<F>
where
    F: Fn(&Error, ModelRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ModelRequest>>> + Send,
{
    async fn retry_model_request(
        &self,
        error: &Error,
        request: &ModelRequest,
    ) -> Result<Option<ModelRequest>> {
        (self.0)(error, request.clone()).await
    }
}

struct WrapLayer {
    middleware: String,
    hook: Arc<dyn WrapModelCall>,
    next: Arc<dyn ModelHandler>,
}

#[async_trait]
impl ModelHandler for WrapLayer {
    async fn handle(&self, request: ModelRequest) -> Result<ModelResponse> {
        debug!(middleware = %self.middleware, "wrap_model_call");
        let guard = ToolGuard {
            middleware: self.middleware.clone(),
            baseline: request.tool_definitions(),
            next: self.next.clone(),
        };
        self.hook
            .wrap_model_call(request, ModelCallNext::new(Arc::new(guard)))
            .await
    }
}

struct ToolGuard {
    middleware: String,
    baseline: Vec<ToolDefinition>,
    next: Arc<dyn ModelHandler>,
}

impl ToolGuard {
    fn check(&self, request: &ModelRequest) -> Result<()> {
        let baseline: HashMap<&str, &ToolDefinition> = self
            .baseline
            .iter()
            .map(|d| (d.name.as_str(), d))
            .collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        for definition in request.tool_definitions() {
            match baseline.get(definition.name.as_str()) {
                None => added.push(definition.name),
                Some(original) if **original != definition => modified.push(definition.name),
                Some(_) => {}
            }
        }

        if !added.is_empty() {
            return Err(Error::ToolAdded {
                middleware: self.middleware.clone(),
                tools: added,
            });
        }
        if !modified.is_empty() {
            return Err(Error::ToolModified {
                middleware: self.middleware.clone(),
                tools: modified,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModelHandler for ToolGuard {
    async fn handle(&self, request: ModelRequest) -> Result<ModelResponse> {
        self.check(&request)?;
        self.next.handle(request).await
    }
}

/// Innermost handler: the actual model call.
pub(crate) struct ModelInvoker {
    retry: Option<RetryPolicy>,
    response_format: Option<Arc<ResponseFormat>>,
}

impl ModelInvoker {
    pub(crate) fn new(
        retry: Option<RetryPolicy>,
        response_format: Option<Arc<ResponseFormat>>,
    ) -> Self {
        Self {
            retry,
            response_format,
        }
    }

    async fn call_once(&self, request: &ModelRequest) -> Result<Message> {
        let mut tools = request.tool_definitions();
        let mut tool_choice = request.tool_choice.clone();
        let mut provider_format = None;
        if let Some(format) = &self.response_format {
            let extraction = format.extraction_tools();
            if !extraction.is_empty() {
                tools.extend(extraction);
                tool_choice = tool_choice.or(Some(ToolChoice::Any));
            }
            provider_format = format.provider_format();
        }

        let cancel = request.runtime.cancellation.clone();
        let options = ModelCallOptions {
            tools: Vec::new(),
            tool_choice: None,
            response_format: provider_format,
            cancellation: cancel.clone(),
        };
        let model = request.model.bind_tools(tools, tool_choice);
        let messages = request.model_messages();

        let mut message = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = crate::model::ChatModel::invoke(&model, &messages, &options) => result?,
        };
        if message.id.is_none() {
            message.id = Some(Uuid::new_v4().to_string());
        }
        Ok(message)
    }

    async fn call_with_retry(&self, request: &ModelRequest) -> Result<Message> {
        let Some(policy) = &self.retry else {
            return self.call_once(request).await;
        };
        match policy
            .execute(&request.runtime.cancellation, |_| self.call_once(request))
            .await
        {
            Ok(message) => Ok(message),
            Err(failure) => policy
                .resolve_failure(failure, |e, n| failure_text("Model call", e, n))
                .map(Message::assistant),
        }
    }

    fn finish(&self, message: Message) -> Result<ModelResponse> {
        let Some(format) = &self.response_format else {
            return Ok(ModelResponse::from_message(message));
        };
        Ok(match format.resolve(&message)? {
            StructuredOutcome::Passthrough => ModelResponse::from_message(message),
            StructuredOutcome::Resolved { value, messages } => ModelResponse {
                messages,
                structured_response: Some(value),
                repair: false,
            },
            StructuredOutcome::Repair { messages } => ModelResponse {
                messages,
                structured_response: None,
                repair: true,
            },
        })
    }
}

#[async_trait]
impl ModelHandler for ModelInvoker {
    async fn handle(&self, request: ModelRequest) -> Result<ModelResponse> {
        let message = self.call_with_retry(&request).await?;
        self.finish(message)
    }
}

/// Outermost handler: consults `retry_model_request` hooks after the
/// composed chain failed with a model or tool error.
struct FallbackLayer {
    chain: Arc<dyn ModelHandler>,
    invoker: Arc<ModelInvoker>,
    hooks: Vec<(String, Arc<dyn RetryModelRequest>)>,
}

#[async_trait]
impl ModelHandler for FallbackLayer {
    async fn handle(&self, request: ModelRequest) -> Result<ModelResponse> {
        let error = match self.chain.handle(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) => error,
        };
        warn!(kind = error.kind(), error = %error, "model call failed");

        for (middleware, hook) in &self.hooks {
            if let Some(replacement) = hook.retry_model_request(&error, &request).await? {
                info!(
                    middleware = %middleware,
                    error = %error,
                    "model call failed, retrying with replacement request"
                );
                let message = self.invoker.call_once(&replacement).await?;
                return self.invoker.finish(message);
            }
        }
        Err(error)
    }
}

/// Fold `(middleware, hook)` layers around `base`; the first layer ends up
/// outermost. Fallback hooks, when present, wrap the finished chain.
pub(crate) fn build_model_chain(
    layers: Vec<(String, Arc<dyn WrapModelCall>)>,
    fallbacks: Vec<(String, Arc<dyn RetryModelRequest>)>,
    base: ModelInvoker,
) -> Arc<dyn ModelHandler> {
    let invoker = Arc::new(base);
    let chain = layers.into_iter().rev().fold(
        invoker.clone() as Arc<dyn ModelHandler>,
        |next, (middleware, hook)| {
            Arc::new(WrapLayer {
                middleware,
                hook,
                next,
            })
        },
    );
    if fallbacks.is_empty() {
        return chain;
    }
    Arc::new(FallbackLayer {
        chain,
        invoker,
        hooks: fallbacks,
    })
}
