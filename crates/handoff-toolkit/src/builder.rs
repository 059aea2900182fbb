//! Tool builder utilities for creating tools from functions
//!
//! Ergonomic helpers for turning closures into `Tool` implementations that
//! agents can resolve alongside manifest and proxied tools.

use async_trait::async_trait;
use handoff_core::tools::{Tool, ToolBox, ToolContext, ToolParameterSchema, ToolResult, ToolSchema};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type alias for async tool handler functions
pub type AsyncToolFn =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, anyhow::Result<ToolResult>> + Send + Sync>;

/// A tool implementation backed by a function/closure
pub struct FunctionTool {
    schema: ToolSchema,
    wants_state: bool,
    handler: AsyncToolFn,
}

#[async_trait]
impl Tool for FunctionTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn wants_state(&self) -> bool {
        self.wants_state
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        (self.handler)(args, ctx).await
    }
}

/// Builder for creating tools from async functions
pub struct ToolBuilder {
    name: String,
    description: String,
    parameters: Option<ToolParameterSchema>,
    wants_state: bool,
}

impl ToolBuilder {
    /// Start building a new tool with the given name and description
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
            wants_state: false,
        }
    }

    /// Set the parameter schema for this tool
    pub fn with_parameters(mut self, parameters: ToolParameterSchema) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Receive the conversation state under the `state` argument key.
    pub fn with_state_injection(mut self, wants_state: bool) -> Self {
        self.wants_state = wants_state;
        self
    }

    /// Build the tool with an async handler function
    pub fn build_async<F, Fut>(self, handler: F) -> ToolBox
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
    {
        let schema = ToolSchema::new(
            self.name,
            self.description,
            self.parameters
                .unwrap_or_else(ToolParameterSchema::empty_object),
        );

        let handler: AsyncToolFn = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));

        Arc::new(FunctionTool {
            schema,
            wants_state: self.wants_state,
            handler,
        })
    }

    /// Build the tool with a sync handler function
    pub fn build_sync<F>(self, handler: F) -> ToolBox
    where
        F: Fn(Value, ToolContext) -> anyhow::Result<ToolResult> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.build_async(move |args, ctx| {
            let handler = handler.clone();
            async move { handler(args, ctx) }
        })
    }
}

/// Quick helper to create a simple async tool
pub fn tool<F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: ToolParameterSchema,
    handler: F,
) -> ToolBox
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
{
    ToolBuilder::new(name, description)
        .with_parameters(parameters)
        .build_async(handler)
}

/// Quick helper to create a simple sync tool
pub fn tool_sync<F>(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: ToolParameterSchema,
    handler: F,
) -> ToolBox
where
    F: Fn(Value, ToolContext) -> anyhow::Result<ToolResult> + Send + Sync + 'static,
{
    ToolBuilder::new(name, description)
        .with_parameters(parameters)
        .build_sync(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn function_tool_executes_handler() {
        let tool = ToolBuilder::new("echo", "Echoes input")
            .with_parameters(ToolParameterSchema::object(
                "Echo parameters",
                [(
                    "message".to_string(),
                    ToolParameterSchema::string("Message to echo"),
                )]
                .into_iter()
                .collect(),
                vec!["message".to_string()],
            ))
            .build_async(|args, ctx| async move {
                let msg = args["message"].as_str().unwrap_or("empty");
                Ok(ToolResult::text(&ctx, format!("Echo: {}", msg)))
            });

        let schema = tool.schema();
        assert_eq!(schema.name, "echo");
        assert!(!tool.wants_state());

        let ctx = ToolContext::new("researcher").with_call_id(Some("c1".into()));
        let result = tool
            .execute(json!({"message": "hello"}), ctx)
            .await
            .unwrap();

        match result {
            ToolResult::Message(msg) => {
                assert_eq!(msg.content.as_text().unwrap(), "Echo: hello");
                assert_eq!(msg.tool_call_id(), Some("c1"));
            }
            _ => panic!("Expected message result"),
        }
    }

    #[tokio::test]
    async fn sync_tool_reads_injected_state() {
        let tool = ToolBuilder::new("history_len", "Counts messages")
            .with_state_injection(true)
            .build_sync(|args, ctx| {
                let count = args["state"]["messages"]
                    .as_array()
                    .map(|messages| messages.len())
                    .unwrap_or(0);
                Ok(ToolResult::text(&ctx, count.to_string()))
            });
        assert!(tool.wants_state());

        let args = json!({"state": {"messages": [1, 2, 3]}});
        match tool.execute(args, ToolContext::default()).await.unwrap() {
            ToolResult::Message(msg) => assert_eq!(msg.content.as_text(), Some("3")),
            _ => panic!("Expected message result"),
        }
    }
}
