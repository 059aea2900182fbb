use async_trait::async_trait;
use futures::StreamExt;
use handoff_core::llm::{DeltaStream, FinishReason, LanguageModel, LlmRequest, LlmResponse, ModelDelta};
use handoff_core::messaging::{AgentMessage, MessageRole, ToolCall};
use handoff_core::tools::ToolSchema;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: Option<String>,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_url: None,
        }
    }

    pub fn with_api_url(mut self, api_url: Option<String>) -> Self {
        self.api_url = api_url;
        self
    }
}

/// Chat-completions backend for OpenAI and compatible servers.
pub struct OpenAiChatModel {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().user_agent("handoff/0.1").build()?,
            config,
        })
    }

    async fn send(&self, request: &LlmRequest, stream: bool) -> anyhow::Result<reqwest::Response> {
        let messages = to_openai_messages(request);
        let tools: Vec<OpenAiTool> = request.tools.iter().map(OpenAiTool::from).collect();
        let tool_count = tools.len();
        let body = ChatRequest {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            messages: &messages,
            tools,
            stream: stream.then_some(true),
        };
        let url = self.config.api_url.as_deref().unwrap_or(DEFAULT_API_URL);

        tracing::debug!(
            model = body.model,
            messages = messages.len(),
            tools = tool_count,
            stream,
            "OpenAI request"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %error_text, "OpenAI API error");
            anyhow::bail!("OpenAI API error: {status} - {error_text}");
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [OpenAiMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunction,
}

#[derive(Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolSchema> for OpenAiTool {
    fn from(schema: &ToolSchema) -> Self {
        Self {
            kind: "function",
            function: OpenAiFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: serde_json::to_value(&schema.parameters)
                    .unwrap_or_else(|_| serde_json::json!({"type": "object"})),
            },
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

// Streaming response structures
#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

fn to_openai_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(OpenAiMessage {
        role: "system",
        content: request.system_prompt.clone(),
        tool_calls: Vec::new(),
        tool_call_id: None,
    });

    for msg in &request.messages {
        let role = match msg.role {
            MessageRole::User => "user",
            MessageRole::Agent => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        };
        let tool_calls = msg
            .tool_calls
            .iter()
            .map(|call| OpenAiToolCall {
                id: call.id.clone(),
                kind: "function".to_string(),
                function: OpenAiFunctionCall {
                    name: call.name.clone(),
                    arguments: match &call.args {
                        Value::String(raw) => raw.clone(),
                        args => args.to_string(),
                    },
                },
            })
            .collect();
        messages.push(OpenAiMessage {
            role,
            content: msg.content.to_text(),
            tool_calls,
            tool_call_id: msg.tool_call_id().map(str::to_string),
        });
    }
    messages
}

/// Deltas carried by one SSE `data:` payload.
fn parse_sse_data(data: &str) -> anyhow::Result<Vec<ModelDelta>> {
    let chunk: StreamResponse = serde_json::from_str(data)?;
    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
            deltas.push(ModelDelta::Text { text });
        }
        for call in choice.delta.tool_calls {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            deltas.push(ModelDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            deltas.push(ModelDelta::finish(FinishReason::parse(&reason)));
        }
    }
    Ok(deltas)
}

/// Splits complete lines off the front of `buffer`, returning the payload of
/// every `data:` line among them. Bytes of an unfinished line stay buffered,
/// so a character split across network chunks is decoded whole.
fn drain_data_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=end).collect();
        let line = String::from_utf8_lossy(&line);
        if let Some(data) = line.trim().strip_prefix("data:") {
            payloads.push(data.trim().to_string());
        }
    }
    payloads
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        let response = self.send(&request, false).await?;
        let data: ChatResponse = response.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("OpenAI response missing choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let args = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments));
                ToolCall::new(call.id, call.function.name, args)
            })
            .collect();
        Ok(LlmResponse {
            message: AgentMessage::agent_with_tool_calls(
                choice.message.content.unwrap_or_default(),
                tool_calls,
            ),
        })
    }

    async fn generate_stream(&self, request: LlmRequest) -> anyhow::Result<DeltaStream> {
        let response = self.send(&request, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow::anyhow!("Stream error: {e}"));
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);
                for data in drain_data_lines(&mut buffer) {
                    if data == "[DONE]" {
                        break 'read;
                    }
                    match parse_sse_data(&data) {
                        Ok(deltas) => {
                            for delta in deltas {
                                yield Ok(delta);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to parse streaming chunk"),
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
