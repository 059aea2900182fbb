//! Persistence traits for parking conversation state while a thread waits
//! for user input.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::state::ConversationState;

/// Unique identifier for a conversation thread/session.
pub type ThreadId = String;

/// Parked execution record for one thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub state: ConversationState,
    /// Node whose `request_user_input` call paused the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_node: Option<String>,
    /// The pending call the user's answer will satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(state: ConversationState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            state,
            paused_node: None,
            paused_tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn paused_at(mut self, node: impl Into<String>, tool_call_id: Option<String>) -> Self {
        self.paused_node = Some(node.into());
        self.paused_tool_call_id = tool_call_id;
        self
    }
}

/// Storage for parked threads. One checkpoint per thread id; saving again
/// overwrites the previous one.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Save the checkpoint for its thread, replacing any previous one.
    async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;

    /// Load the checkpoint for a given thread.
    /// Returns None if the thread is not parked.
    async fn load(&self, thread_id: &ThreadId) -> anyhow::Result<Option<Checkpoint>>;

    /// Delete the checkpoint for a given thread.
    async fn delete(&self, thread_id: &ThreadId) -> anyhow::Result<()>;

    /// List all thread IDs that are currently parked.
    async fn list_threads(&self) -> anyhow::Result<Vec<ThreadId>>;
}

/// In-memory checkpointer.
/// State is not persisted between process restarts.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    checkpoints: std::sync::RwLock<HashMap<ThreadId, Checkpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| {
            anyhow::anyhow!("Failed to acquire write lock on in-memory checkpointer")
        })?;
        checkpoints.insert(checkpoint.thread_id.clone(), checkpoint.clone());
        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            paused_node = ?checkpoint.paused_node,
            "Parked thread in memory"
        );
        Ok(())
    }

    async fn load(&self, thread_id: &ThreadId) -> anyhow::Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().map_err(|_| {
            anyhow::anyhow!("Failed to acquire read lock on in-memory checkpointer")
        })?;
        Ok(checkpoints.get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &ThreadId) -> anyhow::Result<()> {
        let mut checkpoints = self.checkpoints.write().map_err(|_| {
            anyhow::anyhow!("Failed to acquire write lock on in-memory checkpointer")
        })?;
        if checkpoints.remove(thread_id).is_some() {
            tracing::debug!(thread_id = %thread_id, "Deleted checkpoint from memory");
        }
        Ok(())
    }

    async fn list_threads(&self) -> anyhow::Result<Vec<ThreadId>> {
        let checkpoints = self.checkpoints.read().map_err(|_| {
            anyhow::anyhow!("Failed to acquire read lock on in-memory checkpointer")
        })?;
        Ok(checkpoints.keys().cloned().collect())
    }
}
