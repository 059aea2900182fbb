use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::messaging::{AgentMessage, MessageRole, ToolCall};
use crate::persistence::ThreadId;

/// Shared turn state mutated by whichever node is currently active.
///
/// `messages` is append-only: nodes push new entries but never rewrite
/// existing ones.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub thread_id: ThreadId,
    pub messages: Vec<AgentMessage>,
    #[serde(default)]
    pub waiting_for_input: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<ThreadId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    /// Seeds a fresh state with prior history.
    pub fn with_history(thread_id: impl Into<ThreadId>, history: Vec<AgentMessage>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: history,
            ..Self::default()
        }
    }

    pub fn push(&mut self, message: AgentMessage) {
        self.messages.push(message);
    }

    /// Tool calls from the latest request that have no tool-result yet, in
    /// emission order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(position) = self
            .messages
            .iter()
            .rposition(|msg| msg.role == MessageRole::Agent && msg.has_tool_calls())
        else {
            return Vec::new();
        };
        let answered: HashSet<&str> = self.messages[position + 1..]
            .iter()
            .filter(|msg| msg.role == MessageRole::Tool)
            .filter_map(|msg| msg.tool_call_id())
            .collect();
        self.messages[position]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect()
    }
}
