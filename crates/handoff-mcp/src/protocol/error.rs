//! MCP Error Types
//!
//! Failures a tool-protocol client reports back to the engine.

use thiserror::Error;

/// MCP Client Error
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error (I/O, connection, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No server registered under this name
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Tool not found on the named server
    #[error("Tool not found: {server}/{tool}")]
    ToolNotFound { server: String, tool: String },
}

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
