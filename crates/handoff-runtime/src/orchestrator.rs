//! Turn entry point: routes a thread's turn through its compiled graph.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use handoff_core::command::{CommandScope, GotoTarget};
use handoff_core::config::AgentSpec;
use handoff_core::error::SwarmError;
use handoff_core::events::StreamEvent;
use handoff_core::llm::LanguageModel;
use handoff_core::messaging::AgentMessage;
use handoff_core::persistence::{Checkpointer, InMemoryCheckpointer, ThreadId};
use handoff_core::state::ConversationState;
use handoff_mcp::ToolProtocolClient;
use handoff_toolkit::prebuilt::PrebuiltRegistry;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::graph::{CompiledGraph, GraphBuilder};
use crate::interrupt::{answer_pending_calls, InterruptController, MOVED_ON_TEXT, SKIPPED_CALL_TEXT};
use crate::node::{EventSink, NodeOutcome, StepCounter};
use crate::session::{Acquired, Session, SessionRegistry};

pub const DEFAULT_RECURSION_LIMIT: usize = 150;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Step ceiling of one turn.
    pub recursion_limit: usize,
    /// Idle time after which a thread's session is dropped.
    pub session_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            session_ttl: DEFAULT_SESSION_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }
}

/// One turn of one thread.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: ThreadId,
    /// Backend model id; `None` uses the model's default.
    pub model: Option<String>,
    /// The user's message, or their answer when resuming.
    pub message: String,
    /// Prior conversation, used only when the thread has no session yet.
    pub history: Vec<AgentMessage>,
    pub resume: bool,
    pub roster: Vec<AgentSpec>,
}

impl TurnRequest {
    pub fn new(
        thread_id: impl Into<ThreadId>,
        message: impl Into<String>,
        roster: Vec<AgentSpec>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            model: None,
            message: message.into(),
            history: Vec::new(),
            resume: false,
            roster,
        }
    }

    /// A request answering the thread's pending `request_user_input`.
    pub fn resume(
        thread_id: impl Into<ThreadId>,
        answer: impl Into<String>,
        roster: Vec<AgentSpec>,
    ) -> Self {
        Self {
            resume: true,
            ..Self::new(thread_id, answer, roster)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_history(mut self, history: Vec<AgentMessage>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The turn ended normally. `message` is the final assistant message,
    /// absent when a tool ended the turn.
    Completed {
        agent: String,
        message: Option<AgentMessage>,
    },
    /// The turn is parked until the user answers `prompt`.
    Paused { prompt: String, agent: String },
}

/// A running turn: its event stream and its final outcome.
pub struct TurnHandle {
    thread_id: ThreadId,
    events: UnboundedReceiver<StreamEvent>,
    outcome: oneshot::Receiver<Result<TurnOutcome, SwarmError>>,
}

impl TurnHandle {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Events in arrival order. Ends when the turn's task finishes.
    pub fn events(&mut self) -> impl Stream<Item = StreamEvent> + '_ {
        async_stream::stream! {
            while let Some(event) = self.events.recv().await {
                yield event;
            }
        }
    }

    pub async fn outcome(self) -> Result<TurnOutcome, SwarmError> {
        self.outcome.await.map_err(|_| {
            SwarmError::Aborted(format!("turn task of thread '{}' stopped", self.thread_id))
        })?
    }

    /// Drains every event, then waits for the outcome.
    pub async fn collect(mut self) -> (Vec<StreamEvent>, Result<TurnOutcome, SwarmError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, self.outcome().await)
    }
}

pub struct OrchestratorBuilder {
    model: Arc<dyn LanguageModel>,
    mcp_client: Option<Arc<dyn ToolProtocolClient>>,
    prebuilt: PrebuiltRegistry,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn with_mcp_client(mut self, client: Arc<dyn ToolProtocolClient>) -> Self {
        self.mcp_client = Some(client);
        self
    }

    pub fn with_prebuilt(mut self, prebuilt: PrebuiltRegistry) -> Self {
        self.prebuilt = prebuilt;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointer::new()));
        Orchestrator {
            inner: Arc::new(Inner {
                model: self.model,
                mcp_client: self.mcp_client,
                prebuilt: self.prebuilt,
                interrupts: InterruptController::new(checkpointer),
                sessions: SessionRegistry::new(
                    self.config.session_ttl,
                    self.config.max_sessions,
                ),
                config: self.config,
            }),
        }
    }
}

struct Inner {
    model: Arc<dyn LanguageModel>,
    mcp_client: Option<Arc<dyn ToolProtocolClient>>,
    prebuilt: PrebuiltRegistry,
    interrupts: InterruptController,
    sessions: SessionRegistry,
    config: OrchestratorConfig,
}

/// Runs turns for any number of threads. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(model: Arc<dyn LanguageModel>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            model,
            mcp_client: None,
            prebuilt: PrebuiltRegistry::with_defaults(),
            checkpointer: None,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::builder(model).build()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        self.inner.interrupts.checkpointer()
    }

    /// Starts a turn. Graph-build failures and resumes of threads with no
    /// parked checkpoint fail here; everything after is reported through
    /// the returned handle.
    #[instrument(skip(self, request), fields(thread_id = %request.thread_id, resume = request.resume))]
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnHandle, SwarmError> {
        // Requests that are going to fail must not take a session slot, since
        // taking one can evict a parked thread.
        if request.resume && !self.inner.interrupts.is_parked(&request.thread_id).await? {
            return Err(SwarmError::UnknownThread(request.thread_id.clone()));
        }
        let prepared = if self.inner.sessions.is_live(&request.thread_id).await {
            None
        } else {
            Some(Arc::new(self.inner.build_graph(&request).await?))
        };

        let Acquired { mut guard, evicted } =
            self.inner.sessions.acquire(&request.thread_id).await;
        for thread_id in &evicted {
            if let Err(err) = self.inner.interrupts.discard(thread_id).await {
                warn!(%thread_id, error = %err, "Could not drop checkpoint of evicted session");
            }
        }

        let prepared_turn = match (guard.as_ref(), prepared) {
            (Some(session), _) => {
                let graph = session.graph.clone();
                self.inner
                    .prepare_state(graph, Some(&session.state), &request)
                    .await
            }
            (None, Some(graph)) => self.inner.prepare_state(graph, None, &request).await,
            // The session went away after the liveness check.
            (None, None) => match self.inner.build_graph(&request).await {
                Ok(graph) => {
                    self.inner
                        .prepare_state(Arc::new(graph), None, &request)
                        .await
                }
                Err(err) => Err(err),
            },
        };
        let (graph, state, entry) = match prepared_turn {
            Ok(prepared_turn) => prepared_turn,
            Err(err) => {
                self.inner.sessions.release(&request.thread_id, guard).await;
                return Err(err);
            }
        };

        let (sink, events) = EventSink::channel();
        let (outcome_tx, outcome) = oneshot::channel();
        let inner = self.inner.clone();
        let thread_id = request.thread_id.clone();
        tokio::spawn(async move {
            let mut state = state;
            let result = inner.drive_turn(&graph, &mut state, entry, &sink).await;
            if let Err(err) = &result {
                error!(thread_id = %state.thread_id, error = %err, "Turn failed");
                sink.emit(StreamEvent::Error(err.to_string()));
            }
            drop(sink);

            let thread_id = state.thread_id.clone();
            *guard = Some(Session {
                graph,
                state,
                last_activity: Utc::now(),
            });
            drop(guard);
            inner.sessions.touch(&thread_id).await;
            let _ = outcome_tx.send(result);
        });

        Ok(TurnHandle {
            thread_id,
            events,
            outcome,
        })
    }

    /// Snapshot of the thread's stored state. Waits for a running turn of
    /// the thread to finish.
    pub async fn session_state(&self, thread_id: &ThreadId) -> Option<ConversationState> {
        let cell = self.inner.sessions.peek(thread_id).await?;
        let session = cell.lock().await;
        session.as_ref().map(|session| session.state.clone())
    }

    /// Drops idle sessions past their TTL along with their checkpoints.
    pub async fn sweep_sessions(&self) -> Result<Vec<ThreadId>, SwarmError> {
        let evicted = self.inner.sessions.sweep(Utc::now()).await;
        for thread_id in &evicted {
            self.inner.interrupts.discard(thread_id).await?;
        }
        Ok(evicted)
    }
}

impl Inner {
    async fn build_graph(&self, request: &TurnRequest) -> Result<CompiledGraph, SwarmError> {
        GraphBuilder::new(self.model.clone())
            .with_model_id(request.model.clone())
            .with_mcp_client(self.mcp_client.clone())
            .with_prebuilt(self.prebuilt.clone())
            .build(&request.roster)
            .await
    }

    /// The state a turn starts from and the node it enters at.
    async fn prepare_state(
        &self,
        graph: Arc<CompiledGraph>,
        stored: Option<&ConversationState>,
        request: &TurnRequest,
    ) -> Result<(Arc<CompiledGraph>, ConversationState, String), SwarmError> {
        if request.resume {
            let (state, entry) = self
                .interrupts
                .resume(&graph, &request.thread_id, &request.message)
                .await?;
            return Ok((graph, state, entry));
        }

        let parked = self.interrupts.discard(&request.thread_id).await?;
        let mut state = match (stored, parked) {
            (Some(stored), _) => stored.clone(),
            (None, Some(checkpoint)) => checkpoint.state,
            (None, None) => {
                ConversationState::with_history(request.thread_id.clone(), request.history.clone())
            }
        };
        let abandoned = answer_pending_calls(&mut state, MOVED_ON_TEXT);
        if abandoned > 0 {
            debug!(abandoned, "Answered calls left pending by an earlier turn");
        }
        state.waiting_for_input = false;
        state.push(AgentMessage::user(&request.message));
        let entry = graph.entry().to_string();
        Ok((graph, state, entry))
    }

    /// Steps through nodes until a node finishes, a command ends the turn,
    /// or a node parks the thread.
    #[instrument(skip_all, fields(thread_id = %state.thread_id, entry = %entry))]
    async fn drive_turn(
        &self,
        graph: &CompiledGraph,
        state: &mut ConversationState,
        entry: String,
        sink: &EventSink,
    ) -> Result<TurnOutcome, SwarmError> {
        let mut steps = StepCounter::new(self.config.recursion_limit);
        let mut current = entry;
        loop {
            let node = graph
                .node(&current)
                .ok_or_else(|| SwarmError::configuration(format!("no node named '{current}'")))?
                .clone();

            match node.run(state, sink, &mut steps).await? {
                NodeOutcome::Finished(message) => {
                    info!(agent = %current, steps = steps.taken(), "Turn completed");
                    return Ok(TurnOutcome::Completed {
                        agent: current,
                        message: Some(message),
                    });
                }
                NodeOutcome::Command(command) => {
                    state.apply_command(&command);
                    let skipped = answer_pending_calls(state, SKIPPED_CALL_TEXT);
                    if skipped > 0 {
                        debug!(agent = %current, skipped, "Skipped calls after command");
                    }
                    match (command.graph, command.goto) {
                        (_, Some(GotoTarget::End)) => {
                            info!(agent = %current, steps = steps.taken(), "Turn ended by command");
                            sink.emit(StreamEvent::Done);
                            return Ok(TurnOutcome::Completed {
                                agent: current,
                                message: None,
                            });
                        }
                        (CommandScope::Parent, Some(GotoTarget::Node(target))) => {
                            if !graph.contains(&target) {
                                return Err(SwarmError::configuration(format!(
                                    "agent '{current}' handed off to unknown node '{target}'"
                                )));
                            }
                            info!(from = %current, to = %target, "Handoff");
                            current = target;
                        }
                        _ => debug!(agent = %current, "Command applied; staying on node"),
                    }
                }
                NodeOutcome::Interrupted(signal) => {
                    self.interrupts.park(state, &current, &signal).await?;
                    sink.emit(StreamEvent::Interrupt {
                        prompt: signal.prompt.clone(),
                        agent: current.clone(),
                    });
                    return Ok(TurnOutcome::Paused {
                        prompt: signal.prompt,
                        agent: current,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_overrides() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.recursion_limit, 150);
        assert_eq!(config.session_ttl, Duration::from_secs(1800));
        assert_eq!(config.max_sessions, 1024);

        let config = config
            .with_recursion_limit(10)
            .with_session_ttl(Duration::from_secs(5))
            .with_max_sessions(2);
        assert_eq!(config.recursion_limit, 10);
        assert_eq!(config.max_sessions, 2);
    }

    #[test]
    fn resume_request_sets_flag() {
        let request = TurnRequest::resume("t1", "Paris", vec![]).with_model("gpt-4o-mini");
        assert!(request.resume);
        assert_eq!(request.message, "Paris");
        assert_eq!(request.model.as_deref(), Some("gpt-4o-mini"));
    }
}
