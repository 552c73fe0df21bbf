//! Per-invoke runtime handed to every hook and tool.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Read-only data for one `invoke()` call.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub run_id: Uuid,
    pub thread_id: Option<String>,
    /// Context values, validated against the merged context schema.
    pub context: Arc<Map<String, Value>>,
    pub cancellation: CancellationToken,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            thread_id: None,
            context: Arc::new(Map::new()),
            cancellation: CancellationToken::new(),
        }
    }
}

impl Runtime {
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn context_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.context
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
