//! Error types surfaced by graph construction, turns, and resumes.

use thiserror::Error;

use crate::persistence::ThreadId;

#[derive(Debug, Error)]
pub enum SwarmError {
    /// Invalid roster or tool reference; fatal at graph-build time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A tool source could not be turned into tool handles.
    #[error("tool resolution failed: {0}")]
    ToolResolution(String),

    /// A prebuilt tool name is not in the built-in registry.
    #[error("prebuilt tool not found: {0}")]
    NotFound(String),

    /// A tool invocation failed. Folded into a tool-result message during turns.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("unknown thread: {0}")]
    UnknownThread(ThreadId),

    #[error("recursion limit of {limit} steps exceeded at step {step}")]
    RecursionLimitExceeded { limit: usize, step: usize },

    #[error("could not parse arguments of tool call '{name}' (index {index}): {message}")]
    StreamArgumentParse {
        index: usize,
        name: String,
        message: String,
    },

    #[error("model invocation failed for agent '{agent}': {message}")]
    Model { agent: String, message: String },

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),

    /// The task driving a turn stopped without reporting an outcome.
    #[error("turn aborted: {0}")]
    Aborted(String),
}

impl SwarmError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        SwarmError::Configuration(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        SwarmError::ToolResolution(msg.into())
    }

    /// Text of the tool-result message a folded failure becomes.
    pub fn tool_result_text(&self) -> String {
        match self {
            SwarmError::ToolExecution { message, .. } => format!("Error: {message}"),
            other => format!("Error: {other}"),
        }
    }
}
