//! Reassembles streamed model deltas into discrete events.

use std::collections::BTreeMap;

use handoff_core::error::SwarmError;
use handoff_core::events::{StreamEvent, ToolCallReport};
use handoff_core::llm::{FinishReason, ModelDelta};
use handoff_core::messaging::{AgentMessage, ToolCall};
use serde_json::Value;

#[derive(Debug, Default)]
struct DraftCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// A completed tool call. Unparseable arguments are kept as the raw string
/// with the parse failure recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCall {
    pub call: ToolCall,
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResponse {
    pub text: String,
    pub calls: Vec<AggregatedCall>,
    pub finish_reason: Option<FinishReason>,
}

impl AggregatedResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// The assistant message this response appends to the conversation.
    pub fn to_message(&self, agent: &str) -> AgentMessage {
        let calls = self.calls.iter().map(|entry| entry.call.clone()).collect();
        AgentMessage::agent_with_tool_calls(self.text.clone(), calls).with_agent(agent)
    }
}

/// Per-response aggregation state. Text passes straight through; tool-call
/// fragments are held back per index until the response finishes.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    text: String,
    drafts: BTreeMap<usize, DraftCall>,
    calls: Vec<AggregatedCall>,
    finish_reason: Option<FinishReason>,
    flushed: bool,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: ModelDelta) -> Vec<StreamEvent> {
        if self.flushed {
            tracing::trace!(?delta, "Ignoring delta after finish");
            return Vec::new();
        }
        match delta {
            ModelDelta::Text { text } => {
                if text.is_empty() {
                    return Vec::new();
                }
                self.text.push_str(&text);
                vec![StreamEvent::Text(text)]
            }
            ModelDelta::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let draft = self.drafts.entry(index).or_default();
                if draft.id.is_none() {
                    draft.id = id.filter(|id| !id.is_empty());
                }
                if let Some(name) = name {
                    draft.name.push_str(&name);
                }
                if let Some(arguments) = arguments {
                    draft.arguments.push_str(&arguments);
                }
                Vec::new()
            }
            ModelDelta::Finish { reason } => self.flush(reason),
        }
    }

    /// Ends the response. A stream that stopped without a finish signal is
    /// flushed as if one had arrived.
    pub fn finish(mut self) -> (AggregatedResponse, Vec<StreamEvent>) {
        let events = if self.flushed {
            Vec::new()
        } else {
            let reason = if self.drafts.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            };
            self.flush(reason)
        };
        let response = AggregatedResponse {
            text: self.text,
            calls: self.calls,
            finish_reason: self.finish_reason,
        };
        (response, events)
    }

    fn flush(&mut self, reason: FinishReason) -> Vec<StreamEvent> {
        self.flushed = true;
        self.finish_reason = Some(reason);
        if self.drafts.is_empty() {
            return vec![StreamEvent::Done];
        }

        let drafts = std::mem::take(&mut self.drafts);
        self.calls = drafts
            .into_iter()
            .map(|(index, draft)| complete_draft(index, draft))
            .collect();
        let reports = self
            .calls
            .iter()
            .map(|entry| ToolCallReport {
                name: entry.call.name.clone(),
                arguments: entry.call.args.clone(),
                error: entry.parse_error.clone(),
            })
            .collect();
        vec![StreamEvent::ToolCalls(reports)]
    }
}

fn complete_draft(index: usize, draft: DraftCall) -> AggregatedCall {
    let id = draft
        .id
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    let raw = draft.arguments.trim();
    let (args, parse_error) = if raw.is_empty() {
        (Value::Object(Default::default()), None)
    } else {
        match serde_json::from_str::<Value>(raw) {
            Ok(args) => (args, None),
            Err(err) => {
                let error = SwarmError::StreamArgumentParse {
                    index,
                    name: draft.name.clone(),
                    message: err.to_string(),
                };
                tracing::warn!(index, tool_name = %draft.name, error = %error, "Unparseable tool arguments");
                (Value::String(draft.arguments.clone()), Some(error.to_string()))
            }
        }
    };
    AggregatedCall {
        call: ToolCall::new(id, draft.name, args),
        parse_error,
    }
}
