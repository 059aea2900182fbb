//! Tokio-powered runtime that runs handoff agent graphs.
//! A turn enters the [`Orchestrator`], which builds or reuses the thread's
//! compiled graph and steps through agent nodes until one finishes, a tool
//! ends the turn, or an agent parks the thread to ask the user something.

pub mod aggregator;
pub mod builtin;
pub mod graph;
pub mod interrupt;
pub mod node;
pub mod orchestrator;
pub mod providers;
pub mod resolver;
pub mod session;

pub use aggregator::{AggregatedCall, AggregatedResponse, StreamAggregator};
pub use builtin::{transfer_tool_name, RequestUserInputTool, TransferTool, TRANSFER_PREFIX};
pub use graph::{CompiledGraph, GraphBuilder};
pub use interrupt::{answer_pending_calls, InterruptController, MOVED_ON_TEXT, SKIPPED_CALL_TEXT};
pub use node::{AgentNode, EventSink, NodeOutcome, StepCounter};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, TurnHandle, TurnOutcome, TurnRequest,
};
pub use providers::{OpenAiChatModel, OpenAiConfig};
pub use resolver::{ProxiedRoute, ResolvedTools, ToolResolver};
pub use session::{Session, SessionRegistry};
