//! MCP Client contract
//!
//! The engine never speaks the wire protocol itself. Anything that can list a
//! named server's tools and call one of them satisfies this trait, whether it
//! fronts one stdio subprocess or a pool of HTTP servers.

use crate::protocol::{error::McpResult, McpTool, McpToolResult};
use async_trait::async_trait;
use serde_json::Value;

/// Client for one or more named tool-protocol servers.
#[async_trait]
pub trait ToolProtocolClient: Send + Sync {
    /// Lists every tool the named server exposes.
    async fn list_tools(&self, server: &str) -> McpResult<Vec<McpTool>>;

    /// Calls `name` on the named server. `call_id` is the model's tool-call id,
    /// passed through for correlation.
    async fn call_tool(
        &self,
        server: &str,
        name: &str,
        arguments: Value,
        call_id: Option<&str>,
    ) -> McpResult<McpToolResult>;
}
