use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{OutputSchema, StructuredOutcome};
use crate::types::Message;

const DEFAULT_FORMAT_NAME: &str = "response_format";

/// Native JSON-schema response mode forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFormat {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

/// Structured output through the provider's schema-constrained decoding.
/// There is no repair loop: a non-conforming reply yields no value.
#[derive(Debug, Clone)]
pub struct ProviderStrategy {
    schema: OutputSchema,
    strict: bool,
}

impl ProviderStrategy {
    pub fn new(schema: OutputSchema) -> Self {
        Self {
            schema,
            strict: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn format(&self) -> ProviderFormat {
        ProviderFormat {
            name: self
                .schema
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_FORMAT_NAME.to_string()),
            schema: self.schema.schema().clone(),
            strict: self.strict,
        }
    }

    pub fn resolve(&self, response: &Message) -> StructuredOutcome {
        let text = response.text().trim();
        if text.is_empty() {
            return StructuredOutcome::Passthrough;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "provider response is not JSON");
                return StructuredOutcome::Passthrough;
            }
        };
        if let Err(reason) = self.schema.validate(&value) {
            debug!(%reason, "provider response does not match schema");
            return StructuredOutcome::Passthrough;
        }
        StructuredOutcome::Resolved {
            value,
            messages: vec![response.clone()],
        }
    }
}
