use crate::messaging::AgentMessage;
use crate::state::ConversationState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Represents a state delta emitted by tools to be applied by the orchestrator.
///
/// List-valued fields are appended, scalar fields overwritten.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_input: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

/// Where control moves once a command has been applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GotoTarget {
    Node(String),
    End,
}

/// Graph a command is addressed to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandScope {
    /// Re-enter the issuing agent's own loop.
    #[default]
    Current,
    /// Route through the orchestrating graph.
    Parent,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<GotoTarget>,
    #[serde(default)]
    pub graph: CommandScope,
    #[serde(default)]
    pub update: StateDiff,
}

impl Command {
    /// Transfer control to `target` in the orchestrating graph.
    pub fn handoff(target: impl Into<String>, messages: Vec<AgentMessage>) -> Self {
        Self {
            goto: Some(GotoTarget::Node(target.into())),
            graph: CommandScope::Parent,
            update: StateDiff {
                messages,
                ..StateDiff::default()
            },
        }
    }

    /// Finish the turn after applying `messages`.
    pub fn end(messages: Vec<AgentMessage>) -> Self {
        Self {
            goto: Some(GotoTarget::End),
            graph: CommandScope::Parent,
            update: StateDiff {
                messages,
                ..StateDiff::default()
            },
        }
    }

    pub fn with_state(update: StateDiff) -> Self {
        Self {
            update,
            ..Self::default()
        }
    }

    pub fn with_messages(messages: Vec<AgentMessage>) -> Self {
        Self::with_state(StateDiff {
            messages,
            ..StateDiff::default()
        })
    }

    /// Applies the merge patch: messages are appended, scalars overwritten.
    pub fn apply_to(&self, state: &mut ConversationState) {
        state.messages.extend(self.update.messages.iter().cloned());
        if let Some(waiting) = self.update.waiting_for_input {
            state.waiting_for_input = waiting;
        }
        if let Some(metadata) = &self.update.metadata {
            for (key, value) in metadata {
                state.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}

impl ConversationState {
    pub fn apply_command(&mut self, command: &Command) {
        command.apply_to(self);
    }
}
