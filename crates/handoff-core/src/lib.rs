//! Core traits and shared data models for handoff multi-agent graphs.
//! This crate keeps the domain primitives lightweight and platform-agnostic
//! so the runtime and integrations can compose them without pulling in heavy deps.

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod hitl;
pub mod llm;
pub mod messaging;
pub mod persistence;
pub mod prompts;
pub mod state;
pub mod tools;

pub use command::{Command, CommandScope, GotoTarget, StateDiff};
pub use config::{AgentSpec, ToolReference, DECISION_MAKER, INTERRUPT_NODE};
pub use error::SwarmError;
pub use events::{StreamEvent, ToolCallReport};
pub use hitl::{InterruptSignal, REQUEST_USER_INPUT_TOOL};
pub use llm::{
    BoundModel, DeltaStream, FinishReason, LanguageModel, LlmRequest, LlmResponse, ModelDelta,
};
pub use messaging::{AgentMessage, MessageContent, MessageMetadata, MessageRole, ToolCall};
pub use persistence::{Checkpoint, Checkpointer, InMemoryCheckpointer, ThreadId};
pub use state::ConversationState;
pub use tools::{
    Tool, ToolBox, ToolContext, ToolParameterSchema, ToolRegistry, ToolResult, ToolSchema,
};
