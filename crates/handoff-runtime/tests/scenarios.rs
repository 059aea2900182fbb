use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use handoff_core::llm::{response_to_deltas, DeltaStream, ModelDelta};
use handoff_core::{
    AgentMessage, AgentSpec, LanguageModel, LlmRequest, LlmResponse, MessageRole, StreamEvent,
    SwarmError, ToolCall, ToolReference, ToolResult, DECISION_MAKER, REQUEST_USER_INPUT_TOOL,
};
use handoff_runtime::{
    Orchestrator, OrchestratorConfig, TurnOutcome, TurnRequest, MOVED_ON_TEXT,
};
use handoff_toolkit::{PrebuiltRegistry, ToolBox, ToolBuilder};
use serde_json::{json, Value};

type Respond = dyn Fn(&LlmRequest, usize) -> AgentMessage + Send + Sync;

/// Model whose answers come from a closure over (request, call number).
struct ScriptedModel {
    respond: Box<Respond>,
    requests: Mutex<Vec<LlmRequest>>,
    calls: AtomicUsize,
    /// Split tool-call arguments into fragments of this many characters.
    chunk: Option<usize>,
}

impl ScriptedModel {
    fn with<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&LlmRequest, usize) -> AgentMessage + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            chunk: None,
        })
    }

    fn queue(responses: Vec<AgentMessage>) -> Arc<Self> {
        Self::with(move |_, n| {
            responses
                .get(n)
                .cloned()
                .unwrap_or_else(|| AgentMessage::agent("done"))
        })
    }

    fn chunked(responses: Vec<AgentMessage>, chunk: usize) -> Arc<Self> {
        let mut model = Arc::try_unwrap(Self::queue(responses)).ok().unwrap();
        model.chunk = Some(chunk);
        Arc::new(model)
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let message = (self.respond)(&request, n);
        self.requests.lock().unwrap().push(request);
        tokio::task::yield_now().await;
        Ok(LlmResponse { message })
    }

    async fn generate_stream(&self, request: LlmRequest) -> anyhow::Result<DeltaStream> {
        let response = self.generate(request).await?;
        let deltas = response_to_deltas(&response.message);
        let deltas = match self.chunk {
            None => deltas,
            Some(size) => deltas
                .into_iter()
                .flat_map(|delta| split_arguments(delta, size))
                .collect(),
        };
        Ok(Box::pin(stream::iter(deltas.into_iter().map(Ok))))
    }
}

fn split_arguments(delta: ModelDelta, size: usize) -> Vec<ModelDelta> {
    match delta {
        ModelDelta::ToolCall {
            index,
            id,
            name,
            arguments: Some(arguments),
        } => {
            let chars: Vec<char> = arguments.chars().collect();
            let mut out = vec![ModelDelta::ToolCall {
                index,
                id,
                name,
                arguments: None,
            }];
            for piece in chars.chunks(size) {
                out.push(ModelDelta::ToolCall {
                    index,
                    id: None,
                    name: None,
                    arguments: Some(piece.iter().collect()),
                });
            }
            out
        }
        other => vec![other],
    }
}

fn call(id: &str, name: &str, args: Value) -> AgentMessage {
    AgentMessage::agent_with_tool_calls("", vec![ToolCall::new(id, name, args)])
}

fn calls(entries: &[(&str, &str)]) -> AgentMessage {
    AgentMessage::agent_with_tool_calls(
        "",
        entries
            .iter()
            .map(|(id, name)| ToolCall::new(*id, *name, json!({})))
            .collect(),
    )
}

fn researcher_roster() -> Vec<AgentSpec> {
    vec![AgentSpec::new("researcher", "finds facts")]
}

fn tool_results(messages: &[AgentMessage]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .map(|m| {
            (
                m.tool_call_id().unwrap_or_default().to_string(),
                m.content.to_text(),
            )
        })
        .collect()
}

fn prebuilt(name: &'static str, tool: impl Fn() -> ToolBox + Send + Sync + 'static) -> PrebuiltRegistry {
    let mut registry = PrebuiltRegistry::with_defaults();
    registry.register(name, move || Ok(tool()));
    registry
}

#[tokio::test]
async fn dangling_handoff_fails_before_the_turn_starts() {
    let model = ScriptedModel::queue(vec![]);
    let orchestrator = Orchestrator::new(model.clone());
    let roster = vec![AgentSpec::new("researcher", "finds facts").with_hands_off(["ghost"])];

    let err = orchestrator
        .run_turn(TurnRequest::new("t1", "hi", roster))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SwarmError::Configuration(_)));
    assert_eq!(model.call_count(), 0);

    let roster = vec![
        AgentSpec::new("researcher", "finds facts").with_hands_off(["writer", DECISION_MAKER]),
        AgentSpec::new("writer", "writes"),
    ];
    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t2", "hi", roster))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn resume_of_unknown_thread_never_starts_a_turn() {
    let model = ScriptedModel::queue(vec![]);
    let orchestrator = Orchestrator::new(model.clone());

    let err = orchestrator
        .run_turn(TurnRequest::resume("t1", "Paris", researcher_roster()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SwarmError::UnknownThread(ref id) if id == "t1"));
    assert_eq!(model.call_count(), 0);
    assert!(orchestrator.session_state(&"t1".to_string()).await.is_none());
}

#[tokio::test]
async fn chunked_arguments_reach_the_tool_intact() {
    let args = json!({"query": "weather in Paris", "days": 3, "units": {"temp": "C"}});
    for chunk in [1, 2, 7, 1000] {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = seen.clone();
            move || {
                let seen = seen.clone();
                ToolBuilder::new("search", "search").build_sync(move |args, ctx| {
                    seen.lock().unwrap().push(args);
                    Ok(ToolResult::text(&ctx, "found"))
                })
            }
        };
        let model = ScriptedModel::chunked(vec![call("c1", "search", args.clone())], chunk);
        let orchestrator = Orchestrator::builder(model)
            .with_prebuilt(prebuilt("search", recorder))
            .build();
        let roster = vec![AgentSpec::new(DECISION_MAKER, "plans").with_tool(
            ToolReference::Prebuilt {
                name: "search".into(),
            },
        )];

        let (events, outcome) = orchestrator
            .run_turn(TurnRequest::new("t1", "weather?", roster))
            .await
            .unwrap()
            .collect()
            .await;
        outcome.unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[args.clone()], "chunk {chunk}");
        match &events[0] {
            StreamEvent::ToolCalls(reports) => {
                assert_eq!(reports[0].name, "search");
                assert_eq!(reports[0].arguments, args);
            }
            other => panic!("unexpected first event {other:?}"),
        }
    }
}

#[tokio::test]
async fn tool_results_keep_emission_order_regardless_of_latency() {
    let slow = |name: &'static str, millis: u64| {
        move || {
            ToolBuilder::new(name, name).build_async(move |_args, ctx| async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(ToolResult::text(&ctx, name))
            })
        }
    };
    let mut registry = PrebuiltRegistry::with_defaults();
    registry.register("a", {
        let make = slow("a", 30);
        move || Ok(make())
    });
    registry.register("b", {
        let make = slow("b", 15);
        move || Ok(make())
    });
    registry.register("c", {
        let make = slow("c", 0);
        move || Ok(make())
    });

    let model = ScriptedModel::queue(vec![calls(&[("1", "a"), ("2", "b"), ("3", "c")])]);
    let orchestrator = Orchestrator::builder(model)
        .with_prebuilt(registry)
        .build();
    let mut dm = AgentSpec::new(DECISION_MAKER, "plans");
    for name in ["a", "b", "c"] {
        dm = dm.with_tool(ToolReference::Prebuilt { name: name.into() });
    }

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "go", vec![dm]))
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();

    let state = orchestrator.session_state(&"t1".to_string()).await.unwrap();
    let results = tool_results(&state.messages);
    assert_eq!(
        results,
        vec![
            ("1".to_string(), "a".to_string()),
            ("2".to_string(), "b".to_string()),
            ("3".to_string(), "c".to_string()),
        ]
    );
}

#[tokio::test]
async fn interrupt_then_resume_continues_under_the_caller() {
    let model = ScriptedModel::queue(vec![
        call("h1", "transfer_to_researcher", json!({})),
        call(
            "ask",
            REQUEST_USER_INPUT_TOOL,
            json!({"prompt": "which city?", "caller": "researcher"}),
        ),
        AgentMessage::agent("Sunny in Paris."),
    ]);
    let orchestrator = Orchestrator::new(model.clone());

    let (events, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "what's the weather?", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(
        outcome.unwrap(),
        TurnOutcome::Paused {
            prompt: "which city?".into(),
            agent: "researcher".into()
        }
    );
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Interrupt {
            prompt: "which city?".into(),
            agent: "researcher".into()
        })
    );
    assert!(!events.contains(&StreamEvent::Done));
    let parked = orchestrator.checkpointer().load(&"t1".to_string()).await.unwrap();
    assert_eq!(parked.unwrap().paused_tool_call_id.as_deref(), Some("ask"));

    let (events, outcome) = orchestrator
        .run_turn(TurnRequest::resume("t1", "Paris", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    match outcome.unwrap() {
        TurnOutcome::Completed { agent, message } => {
            assert_eq!(agent, "researcher");
            assert_eq!(message.unwrap().content.as_text(), Some("Sunny in Paris."));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(events.last(), Some(&StreamEvent::Done));

    let requests = model.requests();
    let resumed = &requests[2];
    assert!(resumed.system_prompt.starts_with("You are researcher"));
    let answer = resumed.messages.last().unwrap();
    assert_eq!(answer.tool_call_id(), Some("ask"));
    assert_eq!(answer.content.as_text(), Some("Paris"));

    let state = orchestrator.session_state(&"t1".to_string()).await.unwrap();
    assert!(!state.waiting_for_input);
    assert!(orchestrator
        .checkpointer()
        .load(&"t1".to_string())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn fresh_turn_abandons_a_pending_question() {
    let model = ScriptedModel::queue(vec![
        call("ask", REQUEST_USER_INPUT_TOOL, json!({"prompt": "which city?"})),
        AgentMessage::agent("Okay, something else then."),
    ]);
    let orchestrator = Orchestrator::new(model.clone());

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "weather?", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(matches!(outcome.unwrap(), TurnOutcome::Paused { ref agent, .. } if agent == DECISION_MAKER));

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "never mind, tell a joke", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();

    let second = &model.requests()[1];
    let results = tool_results(&second.messages);
    assert_eq!(results, vec![("ask".to_string(), MOVED_ON_TEXT.to_string())]);
    assert_eq!(
        second.messages.last().unwrap().content.as_text(),
        Some("never mind, tell a joke")
    );
    assert!(orchestrator
        .checkpointer()
        .list_threads()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn handoff_runs_the_target_with_full_history() {
    let model = ScriptedModel::queue(vec![
        call("h1", "transfer_to_researcher", json!({})),
        AgentMessage::agent("Here are the facts."),
    ]);
    let orchestrator = Orchestrator::new(model.clone());

    let (events, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "research rust", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(matches!(outcome.unwrap(), TurnOutcome::Completed { ref agent, .. } if agent == "researcher"));
    assert_eq!(
        events.iter().filter(|e| **e == StreamEvent::Done).count(),
        1
    );

    let requests = model.requests();
    assert!(requests[0].system_prompt.starts_with("You are decision_maker"));
    assert!(requests[1].system_prompt.starts_with("You are researcher"));
    let history = &requests[1].messages;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].content.as_text(), Some("research rust"));
    assert_eq!(history[1].tool_calls[0].name, "transfer_to_researcher");
    assert_eq!(history[2].tool_call_id(), Some("h1"));
    assert_eq!(
        history[2].content.as_text(),
        Some("Transferred control from decision_maker to researcher.")
    );
    assert!(requests[1]
        .tools
        .iter()
        .any(|tool| tool.name == "transfer_to_decision_maker"));
}

#[tokio::test]
async fn endless_ping_pong_hits_the_step_ceiling_exactly() {
    let model = ScriptedModel::with(|request, n| {
        let target = if request.system_prompt.starts_with("You are decision_maker") {
            "transfer_to_researcher"
        } else {
            "transfer_to_decision_maker"
        };
        call(&format!("h{n}"), target, json!({}))
    });
    let orchestrator = Orchestrator::new(model.clone());

    let (events, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "loop forever", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;

    match outcome {
        Err(SwarmError::RecursionLimitExceeded { limit, step }) => {
            assert_eq!(limit, 150);
            assert_eq!(step, 150);
        }
        other => panic!("expected recursion limit, got {other:?}"),
    }
    assert_eq!(model.call_count(), 75);
    assert!(matches!(events.last(), Some(StreamEvent::Error(msg)) if msg.contains("150")));
    assert!(!events.contains(&StreamEvent::Done));

    let state = orchestrator.session_state(&"t1".to_string()).await.unwrap();
    assert_eq!(state.pending_tool_calls().len(), 1);
}

#[tokio::test]
async fn lower_ceiling_is_honored() {
    let model = ScriptedModel::with(|_, n| call(&format!("c{n}"), "current_time", json!({})));
    let orchestrator = Orchestrator::builder(model.clone())
        .with_config(OrchestratorConfig::default().with_recursion_limit(6))
        .build();
    let roster = vec![AgentSpec::new(DECISION_MAKER, "plans").with_tool(
        ToolReference::Prebuilt {
            name: "current_time".into(),
        },
    )];
    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "time?", roster))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(matches!(
        outcome,
        Err(SwarmError::RecursionLimitExceeded { limit: 6, step: 6 })
    ));
    assert_eq!(model.call_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_threads_are_isolated() {
    let model = ScriptedModel::with(|request, _| {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.to_text())
            .unwrap_or_default();
        AgentMessage::agent(format!("echo: {last_user}"))
    });
    let orchestrator = Orchestrator::new(model);

    let mut handles = Vec::new();
    for thread in ["t1", "t2"] {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..5 {
                let (_, outcome) = orchestrator
                    .run_turn(TurnRequest::new(thread, format!("{thread}-{round}"), researcher_roster()))
                    .await
                    .unwrap()
                    .collect()
                    .await;
                outcome.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for thread in ["t1", "t2"] {
        let state = orchestrator.session_state(&thread.to_string()).await.unwrap();
        assert_eq!(state.thread_id, thread);
        assert_eq!(state.messages.len(), 10);
        for message in &state.messages {
            assert!(message.content.to_text().contains(thread), "{message:?}");
        }
    }
}

#[tokio::test]
async fn expired_sessions_rebuild_from_supplied_history() {
    let model = ScriptedModel::queue(vec![]);
    let orchestrator = Orchestrator::builder(model)
        .with_config(OrchestratorConfig::default().with_session_ttl(Duration::ZERO))
        .build();

    let history = vec![AgentMessage::user("earlier"), AgentMessage::agent("noted")];
    let (_, outcome) = orchestrator
        .run_turn(
            TurnRequest::new("t1", "first", researcher_roster()).with_history(history.clone()),
        )
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();
    assert_eq!(
        orchestrator
            .session_state(&"t1".to_string())
            .await
            .unwrap()
            .messages
            .len(),
        4
    );

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t2", "other", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();
    assert!(orchestrator.session_state(&"t1".to_string()).await.is_none());

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "again", researcher_roster()).with_history(history))
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();
    let state = orchestrator.session_state(&"t1".to_string()).await.unwrap();
    assert_eq!(state.messages.len(), 4);
    assert_eq!(state.messages[2].content.as_text(), Some("again"));
}

#[tokio::test]
async fn session_cap_evicts_the_oldest_thread() {
    let model = ScriptedModel::queue(vec![]);
    let orchestrator = Orchestrator::builder(model)
        .with_config(OrchestratorConfig::default().with_max_sessions(2))
        .build();
    for thread in ["t1", "t2", "t3"] {
        let (_, outcome) = orchestrator
            .run_turn(TurnRequest::new(thread, "hi", researcher_roster()))
            .await
            .unwrap()
            .collect()
            .await;
        outcome.unwrap();
    }
    assert!(orchestrator.session_state(&"t1".to_string()).await.is_none());
    assert!(orchestrator.session_state(&"t2".to_string()).await.is_some());
    assert!(orchestrator.session_state(&"t3".to_string()).await.is_some());
}

#[tokio::test]
async fn failing_tool_is_folded_and_the_turn_continues() {
    let failing = || {
        ToolBuilder::new("flaky", "fails").build_sync(|_args, _ctx| anyhow::bail!("connection reset"))
    };
    let model = ScriptedModel::queue(vec![
        calls(&[("c1", "flaky"), ("c2", "missing")]),
        AgentMessage::agent("I could not reach the service."),
    ]);
    let orchestrator = Orchestrator::builder(model.clone())
        .with_prebuilt(prebuilt("flaky", failing))
        .build();
    let roster = vec![AgentSpec::new(DECISION_MAKER, "plans").with_tool(
        ToolReference::Prebuilt {
            name: "flaky".into(),
        },
    )];

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "try it", roster))
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();

    let results = tool_results(&model.requests()[1].messages);
    assert_eq!(results[0].1, "Error: connection reset");
    assert_eq!(results[1].1, "Tool 'missing' not available");
}

#[tokio::test]
async fn malformed_inline_manifest_fails_the_build() {
    let orchestrator = Orchestrator::new(ScriptedModel::queue(vec![]));
    let roster = vec![AgentSpec::new("researcher", "finds facts").with_tool(
        ToolReference::InlineCode {
            code: json!({"tools": [{"name": "bad name", "description": "x", "kind": "static", "text": "y"}]})
                .to_string(),
        },
    )];
    let err = orchestrator
        .run_turn(TurnRequest::new("t1", "hi", roster))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SwarmError::ToolResolution(_)));
}

#[tokio::test]
async fn failed_requests_do_not_crowd_out_a_parked_thread() {
    let model = ScriptedModel::queue(vec![call(
        "ask",
        REQUEST_USER_INPUT_TOOL,
        json!({"prompt": "which city?"}),
    )]);
    let orchestrator = Orchestrator::builder(model)
        .with_config(OrchestratorConfig::default().with_max_sessions(2))
        .build();

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t1", "weather?", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(matches!(outcome.unwrap(), TurnOutcome::Paused { .. }));

    let err = orchestrator
        .run_turn(TurnRequest::resume("bogus", "hello", researcher_roster()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SwarmError::UnknownThread(_)));
    let dangling = vec![AgentSpec::new("researcher", "finds facts").with_hands_off(["ghost"])];
    let err = orchestrator
        .run_turn(TurnRequest::new("broken", "hi", dangling))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SwarmError::Configuration(_)));

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::new("t2", "hi", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    outcome.unwrap();
    assert!(orchestrator.session_state(&"bogus".to_string()).await.is_none());
    assert!(orchestrator.session_state(&"broken".to_string()).await.is_none());

    let (_, outcome) = orchestrator
        .run_turn(TurnRequest::resume("t1", "Paris", researcher_roster()))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(matches!(outcome.unwrap(), TurnOutcome::Completed { .. }));
}
