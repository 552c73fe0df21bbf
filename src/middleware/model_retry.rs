//! Retries failed model calls with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;

use super::{IntoMiddleware, MiddlewareDefinition};
use crate::Result;
use crate::model::{ModelCallNext, ModelRequest, ModelResponse, WrapModelCall};
use crate::retry::{OnFailure, RetryOn, RetryPolicy, failure_text};
use crate::types::Message;

pub const MODEL_RETRY_MIDDLEWARE: &str = "modelRetryMiddleware";

/// `wrap_model_call` middleware around the retry controller.
///
/// With [`OnFailure::ReturnMessage`] an exhausted loop becomes an assistant
/// message such as `Model call failed after 3 attempts with TimeoutError: ...`
/// and the run continues.
#[derive(Debug, Clone, Default)]
pub struct ModelRetryMiddleware {
    policy: RetryPolicy,
}

impl ModelRetryMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.policy.retry_on = retry_on;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.policy.on_failure = on_failure;
        self
    }

    pub fn build(self) -> Result<MiddlewareDefinition> {
        self.policy.validate()?;
        Ok(MiddlewareDefinition::new(MODEL_RETRY_MIDDLEWARE)
            .wrap_model_call(ModelRetryHook { policy: self.policy }))
    }
}

impl IntoMiddleware for ModelRetryMiddleware {
    fn into_middleware(self) -> Result<MiddlewareDefinition> {
        self.build()
    }
}

struct ModelRetryHook {
    policy: RetryPolicy,
}

#[async_trait]
impl WrapModelCall for ModelRetryHook {
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: ModelCallNext,
    ) -> Result<ModelResponse> {
        let cancel = request.runtime.cancellation.clone();
        let outcome = self
            .policy
            .execute(&cancel, |_| next.run(request.clone()))
            .await;
        match outcome {
            Ok(response) => Ok(response),
            Err(failure) => self
                .policy
                .resolve_failure(failure, |e, n| failure_text("Model call", e, n))
                .map(|text| ModelResponse::from_message(Message::assistant(text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_validates_policy() {
        let definition = ModelRetryMiddleware::new().with_max_retries(3).build().unwrap();
        assert_eq!(definition.name(), MODEL_RETRY_MIDDLEWARE);
        assert!(definition.wrap_model_call.is_some());

        let err = ModelRetryMiddleware::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
