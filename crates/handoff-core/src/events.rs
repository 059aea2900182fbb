//! Events streamed to the caller while a turn runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of an aggregated `tool_calls` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallReport {
    pub name: String,
    /// Parsed arguments, or the raw argument text when parsing failed.
    pub arguments: Value,
    /// Why the arguments could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text, forwarded as soon as it arrives.
    Text(String),
    ToolCalls(Vec<ToolCallReport>),
    Error(String),
    /// The turn paused waiting for the user.
    Interrupt { prompt: String, agent: String },
    Done,
}

impl StreamEvent {
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StreamEvent::Text(_) => "text",
            StreamEvent::ToolCalls(_) => "tool_calls",
            StreamEvent::Error(_) => "error",
            StreamEvent::Interrupt { .. } => "interrupt",
            StreamEvent::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Error(_) | StreamEvent::Interrupt { .. } | StreamEvent::Done
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_and_content() {
        assert_eq!(
            serde_json::to_value(StreamEvent::Text("hi".into())).unwrap(),
            json!({"type": "text", "content": "hi"})
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Done).unwrap(),
            json!({"type": "done"})
        );

        let calls = StreamEvent::ToolCalls(vec![ToolCallReport {
            name: "search".into(),
            arguments: json!({"q": "rust"}),
            error: None,
        }]);
        assert_eq!(
            serde_json::to_value(calls).unwrap(),
            json!({"type": "tool_calls", "content": [{"name": "search", "arguments": {"q": "rust"}}]})
        );

        let pause = StreamEvent::Interrupt {
            prompt: "which city?".into(),
            agent: "researcher".into(),
        };
        assert_eq!(
            serde_json::to_value(&pause).unwrap(),
            json!({"type": "interrupt", "content": {"prompt": "which city?", "agent": "researcher"}})
        );
        assert!(pause.is_terminal());
    }
}
