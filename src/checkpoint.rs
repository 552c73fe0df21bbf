//! Checkpoint storage for conversation threads.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;
use crate::types::AgentState;

/// Snapshot of a thread's state after one loop step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Loop steps completed in the run that saved this checkpoint.
    pub step: usize,
    pub state: AgentState,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(step: usize, state: AgentState) -> Self {
        Self {
            step,
            state,
            saved_at: Utc::now(),
        }
    }
}

/// Storage backend for checkpoints, keyed by thread id. Only the latest
/// checkpoint of a thread is needed to resume it.
#[async_trait::async_trait]
pub trait Checkpointer: Send + Sync {
    fn name(&self) -> &str;

    async fn save(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    async fn delete(&self, thread_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<String>>;
}

/// In-memory checkpointer (for testing and single-instance deployments)
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointer {
    threads: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }
}

#[async_trait::async_trait]
impl Checkpointer for MemoryCheckpointer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut threads = self.threads.write().await;
        threads.insert(thread_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let mut threads = self.threads.write().await;
        Ok(threads.remove(thread_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let threads = self.threads.read().await;
        let mut ids: Vec<String> = threads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
