//! # handoff-mcp
//!
//! Model Context Protocol (MCP) integration for the handoff engine.
//!
//! The engine treats the tool-protocol transport as an external collaborator.
//! This crate defines the contract that collaborator must satisfy and adapts
//! the tools it exposes to the engine's tool system.
//!
//! ## Features
//!
//! - **Client contract**: [`ToolProtocolClient`] lists and calls tools on named servers
//! - **Protocol types**: tool definitions, call results and content blocks
//! - **Tool Adapter**: conversion of server tools to engine tools, with name normalization
//!
//! ## Example
//!
//! ```rust,ignore
//! use handoff_mcp::{create_mcp_tools, ToolProtocolClient};
//!
//! let client: Arc<dyn ToolProtocolClient> = Arc::new(MyServers::connect().await?);
//! for adapter in create_mcp_tools(client, "filesystem").await? {
//!     println!("Tool: {} (server name {})", adapter.exposed_name(), adapter.original_name());
//! }
//! ```

pub mod protocol;

mod client;
mod tool_adapter;

// Re-exports
pub use client::ToolProtocolClient;
pub use protocol::{
    error::{McpError, McpResult},
    types::{McpContent, McpTool, McpToolResult},
};
pub use tool_adapter::{create_mcp_tools, normalize_tool_name, render_result, McpToolAdapter};
