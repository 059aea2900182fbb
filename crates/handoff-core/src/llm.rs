use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

use crate::messaging::AgentMessage;
use crate::tools::ToolSchema;

/// Request structure passed to a language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<AgentMessage>,
    /// Tool schemas the model may call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    /// Backend model id. `None` lets the backend use its configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl LlmRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<AgentMessage>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            tools: Vec::new(),
            model: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub message: AgentMessage,
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// One partial chunk of a streamed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelDelta {
    /// Incremental assistant text.
    Text { text: String },
    /// Fragment of the tool call at `index`. Only the first fragment of a
    /// call usually carries `id` and `name`.
    ToolCall {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    Finish { reason: FinishReason },
}

impl ModelDelta {
    pub fn text(text: impl Into<String>) -> Self {
        ModelDelta::Text { text: text.into() }
    }

    pub fn tool_call(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Self {
        ModelDelta::ToolCall {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: arguments.map(str::to_string),
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        ModelDelta::Finish { reason }
    }
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<ModelDelta>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse>;

    /// Streams the response as deltas. Backends without native streaming get
    /// the complete response replayed as a single burst.
    async fn generate_stream(&self, request: LlmRequest) -> anyhow::Result<DeltaStream> {
        let response = self.generate(request).await?;
        Ok(Box::pin(stream::iter(
            response_to_deltas(&response.message)
                .into_iter()
                .map(Ok),
        )))
    }
}

/// Replays a complete assistant message as the deltas a streaming backend
/// would have produced.
pub fn response_to_deltas(message: &AgentMessage) -> Vec<ModelDelta> {
    let mut deltas = Vec::with_capacity(message.tool_calls.len() + 2);
    let text = message.content.to_text();
    if !text.is_empty() {
        deltas.push(ModelDelta::Text { text });
    }
    for (index, call) in message.tool_calls.iter().enumerate() {
        deltas.push(ModelDelta::ToolCall {
            index,
            id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            arguments: Some(call.args.to_string()),
        });
    }
    let reason = if message.has_tool_calls() {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    };
    deltas.push(ModelDelta::Finish { reason });
    deltas
}

/// A model handle with a fixed tool set bound to it.
#[derive(Clone)]
pub struct BoundModel {
    model: Arc<dyn LanguageModel>,
    model_id: Option<String>,
    tools: Vec<ToolSchema>,
}

impl BoundModel {
    pub fn new(model: Arc<dyn LanguageModel>, model_id: Option<String>) -> Self {
        Self {
            model,
            model_id,
            tools: Vec::new(),
        }
    }

    pub fn bind_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tools(&self) -> &[ToolSchema] {
        &self.tools
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    /// Streams a chat completion over `messages` with the bound tools.
    pub async fn chat(
        &self,
        system_prompt: &str,
        messages: &[AgentMessage],
    ) -> anyhow::Result<DeltaStream> {
        let request = LlmRequest::new(system_prompt, messages.to_vec())
            .with_tools(self.tools.clone())
            .with_model(self.model_id.clone());
        self.model.generate_stream(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ToolCall;
    use futures::StreamExt;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                message: AgentMessage::agent(format!(
                    "{}:{}",
                    request.model.unwrap_or_default(),
                    request.tools.len()
                )),
            })
        }
    }

    #[test]
    fn tool_call_response_replays_as_indexed_deltas() {
        let message = AgentMessage::agent_with_tool_calls(
            "",
            vec![
                ToolCall::new("a", "first", json!({"x": 1})),
                ToolCall::new("b", "second", json!({})),
            ],
        );
        let deltas = response_to_deltas(&message);
        assert_eq!(deltas.len(), 3);
        assert_eq!(
            deltas[1],
            ModelDelta::tool_call(1, Some("b"), Some("second"), Some("{}"))
        );
        assert_eq!(deltas[2], ModelDelta::finish(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn bound_model_passes_tools_and_model_id() {
        let bound = BoundModel::new(Arc::new(Echo), Some("gpt-x".into()))
            .bind_tools(vec![ToolSchema::no_params("noop", "does nothing")]);
        let deltas: Vec<_> = bound
            .chat("sys", &[AgentMessage::user("hi")])
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(
            deltas[0].as_ref().unwrap(),
            &ModelDelta::text("gpt-x:1")
        );
    }

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::Other("content_filter".into())
        );
    }
}
