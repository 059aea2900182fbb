//! One agent's think-act loop.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use handoff_core::command::Command;
use handoff_core::error::SwarmError;
use handoff_core::events::StreamEvent;
use handoff_core::hitl::InterruptSignal;
use handoff_core::llm::BoundModel;
use handoff_core::messaging::{AgentMessage, MessageMetadata, MessageRole, ToolCall};
use handoff_core::state::ConversationState;
use handoff_core::tools::{ToolContext, ToolRegistry, ToolResult};
use handoff_mcp::{render_result, ToolProtocolClient};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, instrument, warn};

use crate::aggregator::{AggregatedCall, AggregatedResponse, StreamAggregator};
use crate::resolver::{ProxiedRoute, ResolvedTools};

/// Outward event channel of a turn. Delivery is best effort: once the
/// receiver is gone events are dropped and the turn carries on.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<StreamEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Step budget of one turn. Every model call and every tool batch takes one
/// step; the step that reaches the limit fails.
#[derive(Debug, Clone)]
pub struct StepCounter {
    limit: usize,
    taken: usize,
}

impl StepCounter {
    pub fn new(limit: usize) -> Self {
        Self { limit, taken: 0 }
    }

    pub fn consume(&mut self) -> Result<usize, SwarmError> {
        let step = self.taken + 1;
        if step >= self.limit {
            return Err(SwarmError::RecursionLimitExceeded {
                limit: self.limit,
                step,
            });
        }
        self.taken = step;
        Ok(step)
    }

    pub fn taken(&self) -> usize {
        self.taken
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// The model answered without calling tools.
    Finished(AgentMessage),
    /// A tool transferred control or updated state. Its update has not been
    /// applied yet.
    Command(Command),
    /// A tool asked the user for input.
    Interrupted(InterruptSignal),
}

enum BatchOutcome {
    Completed,
    Command(Command),
    Interrupted(InterruptSignal),
}

pub struct AgentNode {
    name: String,
    system_prompt: String,
    model: BoundModel,
    tools: ToolRegistry,
    proxied: HashMap<String, ProxiedRoute>,
    client: Option<Arc<dyn ToolProtocolClient>>,
}

impl AgentNode {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: BoundModel,
        tools: ResolvedTools,
        client: Option<Arc<dyn ToolProtocolClient>>,
    ) -> Self {
        let model = model.bind_tools(tools.registry.schemas());
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
            tools: tools.registry,
            proxied: tools.proxied,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    /// Runs CALL_MODEL / CALL_TOOLS until the model stops calling tools, a
    /// tool returns a command, or a tool interrupts.
    #[instrument(skip_all, fields(agent = %self.name, thread_id = %state.thread_id))]
    pub async fn run(
        &self,
        state: &mut ConversationState,
        sink: &EventSink,
        steps: &mut StepCounter,
    ) -> Result<NodeOutcome, SwarmError> {
        loop {
            let step = steps.consume()?;
            debug!(step, "CALL_MODEL");
            let response = self.call_model(state, sink).await?;
            let message = response.to_message(&self.name);
            state.push(message.clone());
            if !response.has_tool_calls() {
                return Ok(NodeOutcome::Finished(message));
            }

            let step = steps.consume()?;
            debug!(step, calls = response.calls.len(), "CALL_TOOLS");
            match self.call_tools(&response.calls, state).await {
                BatchOutcome::Completed => continue,
                BatchOutcome::Command(command) => return Ok(NodeOutcome::Command(command)),
                BatchOutcome::Interrupted(signal) => return Ok(NodeOutcome::Interrupted(signal)),
            }
        }
    }

    async fn call_model(
        &self,
        state: &ConversationState,
        sink: &EventSink,
    ) -> Result<AggregatedResponse, SwarmError> {
        let model_error = |err: anyhow::Error| SwarmError::Model {
            agent: self.name.clone(),
            message: err.to_string(),
        };

        let mut stream = self
            .model
            .chat(&self.system_prompt, &state.messages)
            .await
            .map_err(model_error)?;
        let mut aggregator = StreamAggregator::new();
        while let Some(delta) = stream.next().await {
            for event in aggregator.push(delta.map_err(model_error)?) {
                sink.emit(event);
            }
        }
        let (response, events) = aggregator.finish();
        for event in events {
            sink.emit(event);
        }
        Ok(response)
    }

    /// Runs the batch strictly in emission order. Every completed call
    /// appends its tool-result before the next call starts.
    async fn call_tools(
        &self,
        calls: &[AggregatedCall],
        state: &mut ConversationState,
    ) -> BatchOutcome {
        for entry in calls {
            let call = &entry.call;
            if let Some(error) = &entry.parse_error {
                state.push(AgentMessage::tool_result(
                    &call.id,
                    &call.name,
                    format!("Error: {error}"),
                ));
                continue;
            }

            let ctx = ToolContext::new(&self.name).with_call_id(Some(call.id.clone()));
            match self.invoke(call, state, ctx).await {
                Ok(ToolResult::Message(message)) => {
                    state.push(tag_tool_result(message, call));
                }
                Ok(ToolResult::Command(command)) => {
                    debug!(tool_name = %call.name, goto = ?command.goto, "Tool returned command");
                    return BatchOutcome::Command(command);
                }
                Ok(ToolResult::Interrupt(signal)) => {
                    let signal = if signal.tool_call_id.is_none() {
                        signal.with_call_id(Some(call.id.clone()))
                    } else {
                        signal
                    };
                    return BatchOutcome::Interrupted(signal);
                }
                Err(err) => {
                    let failure = SwarmError::ToolExecution {
                        tool: call.name.clone(),
                        message: err.to_string(),
                    };
                    warn!(error = %failure, "Tool failed");
                    state.push(AgentMessage::tool_result(
                        &call.id,
                        &call.name,
                        failure.tool_result_text(),
                    ));
                }
            }
        }
        BatchOutcome::Completed
    }

    async fn invoke(
        &self,
        call: &ToolCall,
        state: &ConversationState,
        ctx: ToolContext,
    ) -> anyhow::Result<ToolResult> {
        if let (Some(route), Some(client)) = (self.proxied.get(&call.name), &self.client) {
            debug!(tool_name = %call.name, server = %route.server, "Dispatching proxied tool");
            let result = client
                .call_tool(&route.server, &route.tool_name, call.args.clone(), Some(&call.id))
                .await?;
            return Ok(ToolResult::text(&ctx, render_result(&result)));
        }

        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool_name = %call.name, "Model requested unknown tool");
            return Ok(ToolResult::text(
                &ctx,
                format!("Tool '{}' not available", call.name),
            ));
        };

        let mut args = call.args.clone();
        if tool.wants_state() {
            match &mut args {
                Value::Object(map) => {
                    map.insert("state".to_string(), serde_json::to_value(state)?);
                }
                other => anyhow::bail!(
                    "arguments must be a JSON object to receive state, got {other}"
                ),
            }
        }
        tool.execute(args, ctx).await
    }
}

/// Makes sure a tool-built message is correlated with the call it answers.
fn tag_tool_result(mut message: AgentMessage, call: &ToolCall) -> AgentMessage {
    message.role = MessageRole::Tool;
    let metadata = message.metadata.get_or_insert_with(MessageMetadata::default);
    metadata.tool_call_id.get_or_insert_with(|| call.id.clone());
    metadata.tool_name.get_or_insert_with(|| call.name.clone());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use handoff_core::llm::{LanguageModel, LlmRequest, LlmResponse};
    use handoff_core::tools::{Tool, ToolBox, ToolSchema};
    use handoff_mcp::{McpError, McpTool, McpToolResult};
    use handoff_toolkit::builder::ToolBuilder;
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<Vec<AgentMessage>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<AgentMessage>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
            self.requests.lock().unwrap().push(request);
            let message = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| AgentMessage::agent("done"));
            Ok(LlmResponse { message })
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn schema(&self) -> ToolSchema {
            ToolSchema::no_params("flaky", "always fails")
        }

        async fn execute(&self, _args: Value, _ctx: ToolContext) -> anyhow::Result<ToolResult> {
            anyhow::bail!("upstream timeout")
        }
    }

    fn node(model: Arc<Scripted>, tools: Vec<ToolBox>) -> AgentNode {
        let mut resolved = ResolvedTools::default();
        for tool in tools {
            resolved.add_local(tool);
        }
        AgentNode::new(
            "researcher",
            "You are researcher",
            BoundModel::new(model, None),
            resolved,
            None,
        )
    }

    fn calls(names: &[(&str, &str)]) -> AgentMessage {
        AgentMessage::agent_with_tool_calls(
            "",
            names
                .iter()
                .map(|(id, name)| ToolCall::new(*id, *name, json!({})))
                .collect(),
        )
    }

    #[test]
    fn step_counter_fails_at_the_limit() {
        let mut steps = StepCounter::new(3);
        assert_eq!(steps.consume().unwrap(), 1);
        assert_eq!(steps.consume().unwrap(), 2);
        assert!(matches!(
            steps.consume(),
            Err(SwarmError::RecursionLimitExceeded { limit: 3, step: 3 })
        ));
        assert_eq!(steps.taken(), 2);
    }

    #[tokio::test]
    async fn errors_and_unknown_tools_are_folded_into_results() {
        let model = Scripted::new(vec![
            calls(&[("a", "flaky"), ("b", "missing"), ("c", "echo")]),
            AgentMessage::agent("recovered"),
        ]);
        let echo = ToolBuilder::new("echo", "echo")
            .build_sync(|_args, ctx| Ok(ToolResult::text(&ctx, "echoed")));
        let node = node(model.clone(), vec![Arc::new(Failing) as ToolBox, echo]);

        let mut state = ConversationState::new("t1");
        state.push(AgentMessage::user("go"));
        let mut steps = StepCounter::new(150);
        let outcome = node
            .run(&mut state, &EventSink::discard(), &mut steps)
            .await
            .unwrap();

        assert!(matches!(outcome, NodeOutcome::Finished(ref m) if m.content.as_text() == Some("recovered")));
        let results: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| (m.tool_call_id().unwrap().to_string(), m.content.to_text()))
            .collect();
        assert_eq!(results[0].0, "a");
        assert_eq!(results[0].1, "Error: upstream timeout");
        assert_eq!(results[1].1, "Tool 'missing' not available");
        assert_eq!(results[2].1, "echoed");
        assert_eq!(steps.taken(), 3);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].system_prompt, "You are researcher");
        assert_eq!(requests[0].tools.len(), 2);
        assert_eq!(requests[1].messages.len(), 5);
    }

    #[tokio::test]
    async fn state_is_injected_for_tools_that_want_it() {
        let model = Scripted::new(vec![calls(&[("a", "count")])]);
        let count = ToolBuilder::new("count", "count messages")
            .with_state_injection(true)
            .build_sync(|args, ctx| {
                let len = args["state"]["messages"].as_array().map_or(0, Vec::len);
                Ok(ToolResult::text(&ctx, len.to_string()))
            });
        let node = node(model, vec![count]);

        let mut state = ConversationState::new("t1");
        state.push(AgentMessage::user("how long?"));
        node.run(&mut state, &EventSink::discard(), &mut StepCounter::new(150))
            .await
            .unwrap();
        assert_eq!(state.messages[2].content.as_text(), Some("2"));
    }

    #[tokio::test]
    async fn command_short_circuits_the_batch() {
        let model = Scripted::new(vec![calls(&[("a", "stop"), ("b", "echo")])]);
        let stop = ToolBuilder::new("stop", "stop")
            .build_sync(|_args, _ctx| Ok(ToolResult::Command(Command::end(vec![]))));
        let echo = ToolBuilder::new("echo", "echo")
            .build_sync(|_args, _ctx| panic!("must not run after a command"));
        let node = node(model, vec![stop, echo]);

        let mut state = ConversationState::new("t1");
        let outcome = node
            .run(&mut state, &EventSink::discard(), &mut StepCounter::new(150))
            .await
            .unwrap();
        assert!(matches!(outcome, NodeOutcome::Command(_)));
        assert_eq!(state.pending_tool_calls().len(), 2);
    }

    #[tokio::test]
    async fn events_stream_text_then_tool_calls() {
        let model = Scripted::new(vec![AgentMessage::agent_with_tool_calls(
            "let me check",
            vec![ToolCall::new("a", "echo", json!({"x": 1}))],
        )]);
        let echo = ToolBuilder::new("echo", "echo")
            .build_sync(|_args, ctx| Ok(ToolResult::text(&ctx, "ok")));
        let node = node(model, vec![echo]);

        let (sink, mut rx) = EventSink::channel();
        let mut state = ConversationState::new("t1");
        node.run(&mut state, &sink, &mut StepCounter::new(150))
            .await
            .unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events[0], StreamEvent::Text("let me check".into()));
        assert!(matches!(events[1], StreamEvent::ToolCalls(ref r) if r[0].name == "echo"));
        assert_eq!(events[2], StreamEvent::Text("done".into()));
        assert_eq!(events[3], StreamEvent::Done);
    }

    struct SearchServer {
        calls: Mutex<Vec<(String, String, Option<String>, Value)>>,
    }

    #[async_trait]
    impl ToolProtocolClient for SearchServer {
        async fn list_tools(&self, _server: &str) -> Result<Vec<McpTool>, McpError> {
            Ok(vec![
                McpTool::new("web-search", "Search the web", json!({"type": "object"})),
                McpTool::new("quota-check", "Check quota", json!({"type": "object"})),
            ])
        }

        async fn call_tool(
            &self,
            server: &str,
            name: &str,
            arguments: Value,
            call_id: Option<&str>,
        ) -> Result<McpToolResult, McpError> {
            self.calls.lock().unwrap().push((
                server.to_string(),
                name.to_string(),
                call_id.map(str::to_string),
                arguments,
            ));
            Ok(match name {
                "web-search" => McpToolResult::text("3 results"),
                _ => McpToolResult::error("quota exhausted"),
            })
        }
    }

    #[tokio::test]
    async fn proxied_calls_go_straight_to_their_server() {
        let server = Arc::new(SearchServer {
            calls: Mutex::new(Vec::new()),
        });
        let client: Arc<dyn ToolProtocolClient> = server.clone();
        let resolved = crate::resolver::ToolResolver::new(
            Some(client.clone()),
            handoff_toolkit::prebuilt::PrebuiltRegistry::empty(),
        )
        .resolve_all(&[handoff_core::config::ToolReference::Proxied {
            server: "search".into(),
        }])
        .await
        .unwrap();

        let model = Scripted::new(vec![AgentMessage::agent_with_tool_calls(
            "",
            vec![
                ToolCall::new("c1", "web_search", json!({"q": "paris"})),
                ToolCall::new("c2", "quota_check", json!({})),
            ],
        )]);
        let node = AgentNode::new(
            "researcher",
            "You are researcher",
            BoundModel::new(model, None),
            resolved,
            Some(client),
        );

        let mut state = ConversationState::new("t1");
        node.run(&mut state, &EventSink::discard(), &mut StepCounter::new(150))
            .await
            .unwrap();

        let calls = server.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "search".to_string(),
                "web-search".to_string(),
                Some("c1".to_string()),
                json!({"q": "paris"})
            )
        );
        assert_eq!(calls[1].1, "quota-check");
        assert_eq!(calls[1].2.as_deref(), Some("c2"));

        let results: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .map(|m| (m.tool_call_id().unwrap().to_string(), m.content.to_text()))
            .collect();
        assert_eq!(
            results,
            vec![
                ("c1".to_string(), "3 results".to_string()),
                ("c2".to_string(), "Error: quota exhausted".to_string()),
            ]
        );
    }
}
