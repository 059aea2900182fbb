//! MCP Tool Adapter
//!
//! Adapts tools listed by a tool-protocol server to the engine's tool system,
//! so proxied tools sit alongside local ones in an agent's tool set.

use crate::{McpError, McpTool, McpToolResult, ToolProtocolClient};
use async_trait::async_trait;
use handoff_core::tools::{Tool, ToolBox, ToolContext, ToolParameterSchema, ToolResult, ToolSchema};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Adapts one server-side tool to the `Tool` trait.
///
/// The exposed name has `-` replaced by `_` so every model backend accepts it;
/// calls are forwarded under the server's original name.
pub struct McpToolAdapter {
    client: Arc<dyn ToolProtocolClient>,
    server: String,
    tool: McpTool,
}

impl McpToolAdapter {
    pub fn new(client: Arc<dyn ToolProtocolClient>, server: impl Into<String>, tool: McpTool) -> Self {
        Self {
            client,
            server: server.into(),
            tool,
        }
    }

    /// Convert this adapter into a boxed Tool (ToolBox)
    pub fn into_toolbox(self) -> ToolBox {
        Arc::new(self)
    }

    /// Name the model sees.
    pub fn exposed_name(&self) -> String {
        normalize_tool_name(&self.tool.name)
    }

    /// Name the server knows the tool by.
    pub fn original_name(&self) -> &str {
        &self.tool.name
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Forwards a call to the server and flattens its content to text.
    /// Results flagged `isError` come back as `Error: ...` text.
    pub async fn invoke(&self, args: Value, call_id: Option<&str>) -> Result<String, McpError> {
        let result = self
            .client
            .call_tool(&self.server, &self.tool.name, args, call_id)
            .await?;
        Ok(render_result(&result))
    }

    /// Convert MCP JSON Schema to the engine's ToolParameterSchema
    pub fn convert_schema(mcp_schema: &Value) -> ToolParameterSchema {
        let schema_type = mcp_schema
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("object")
            .to_string();

        let description = mcp_schema
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let properties = mcp_schema.get("properties").and_then(|p| {
            p.as_object().map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::convert_schema(v)))
                    .collect::<HashMap<_, _>>()
            })
        });

        let required = mcp_schema.get("required").and_then(|r| {
            r.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect::<Vec<_>>()
            })
        });

        let items = mcp_schema
            .get("items")
            .map(|i| Box::new(Self::convert_schema(i)));

        let enum_values = mcp_schema.get("enum").and_then(|e| e.as_array().cloned());

        let default = mcp_schema.get("default").cloned();

        let additional = mcp_schema
            .as_object()
            .into_iter()
            .flatten()
            .filter(|(key, _)| {
                !matches!(
                    key.as_str(),
                    "type" | "description" | "properties" | "required" | "items" | "enum" | "default"
                )
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        ToolParameterSchema {
            schema_type,
            description,
            properties,
            required,
            items,
            enum_values,
            default,
            additional,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.exposed_name(),
            description: self.tool.description.clone().unwrap_or_default(),
            parameters: Self::convert_schema(&self.tool.input_schema),
        }
    }

    #[instrument(skip(self, args, ctx), fields(server = %self.server, tool_name = %self.tool.name))]
    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        debug!("Executing proxied tool via adapter");
        let text = self.invoke(args, ctx.tool_call_id.as_deref()).await?;
        Ok(ToolResult::text(&ctx, text))
    }
}

/// Tool names must match `^[a-zA-Z0-9_-]+$` for every backend; dashes are
/// normalized to underscores.
pub fn normalize_tool_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Text of a call result, with server-side failures prefixed by `Error:`.
pub fn render_result(result: &McpToolResult) -> String {
    let content = result.to_text();
    if result.is_error {
        warn!("Proxied tool returned error result");
        format!("Error: {}", content)
    } else {
        content
    }
}

/// Lists the named server's tools and wraps each in an adapter.
#[instrument(skip(client))]
pub async fn create_mcp_tools(
    client: Arc<dyn ToolProtocolClient>,
    server: &str,
) -> Result<Vec<McpToolAdapter>, McpError> {
    let tools = client.list_tools(server).await?;
    debug!(count = tools.len(), "Listed proxied tools");
    Ok(tools
        .into_iter()
        .map(|tool| McpToolAdapter::new(client.clone(), server, tool))
        .collect())
}
