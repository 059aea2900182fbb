//! Core tool system for agents
//!
//! This module provides a unified, schema-driven tool system that enables:
//! - Tool definitions with JSON Schema parameters sent to the model
//! - A registry for lookup by name during the tool-calling loop
//! - Results that either answer a call, transfer control, or pause the thread

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::command::Command;
use crate::hitl::InterruptSignal;
use crate::messaging::{AgentMessage, MessageContent, MessageMetadata, MessageRole};

/// JSON Schema definition for tool parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParameterSchema {
    /// JSON Schema type (object, string, number, boolean, array, null)
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Description of this parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Properties for object types (nested schemas)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, ToolParameterSchema>>,

    /// Required property names for object types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,

    /// Items schema for array types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ToolParameterSchema>>,

    /// Enum values for restricted choices
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Default value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Additional schema properties (min, max, pattern, etc.)
    #[serde(flatten)]
    pub additional: HashMap<String, Value>,
}

impl ToolParameterSchema {
    fn of_type(schema_type: &str, description: Option<String>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description,
            properties: None,
            required: None,
            items: None,
            enum_values: None,
            default: None,
            additional: HashMap::new(),
        }
    }

    /// Create a simple string parameter
    pub fn string(description: impl Into<String>) -> Self {
        Self::of_type("string", Some(description.into()))
    }

    /// Create a number parameter
    pub fn number(description: impl Into<String>) -> Self {
        Self::of_type("number", Some(description.into()))
    }

    /// Create an integer parameter
    pub fn integer(description: impl Into<String>) -> Self {
        Self::of_type("integer", Some(description.into()))
    }

    /// Create a boolean parameter
    pub fn boolean(description: impl Into<String>) -> Self {
        Self::of_type("boolean", Some(description.into()))
    }

    /// Create an object parameter with properties
    pub fn object(
        description: impl Into<String>,
        properties: HashMap<String, ToolParameterSchema>,
        required: Vec<String>,
    ) -> Self {
        Self {
            properties: Some(properties),
            required: Some(required),
            ..Self::of_type("object", Some(description.into()))
        }
    }

    /// An object schema with no properties.
    pub fn empty_object() -> Self {
        Self {
            properties: Some(HashMap::new()),
            required: Some(Vec::new()),
            ..Self::of_type("object", None)
        }
    }

    /// Create an array parameter
    pub fn array(description: impl Into<String>, items: ToolParameterSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of_type("array", Some(description.into()))
        }
    }

    /// Parses a raw JSON Schema document.
    pub fn from_json(value: &Value) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Complete schema definition for a tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    /// Unique, stable name for this tool (used by the model for invocation)
    pub name: String,

    /// Human-readable description of what this tool does
    pub description: String,

    /// Input parameter schema (an object with properties)
    pub parameters: ToolParameterSchema,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a tool schema with no parameters
    pub fn no_params(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ToolParameterSchema::empty_object())
    }
}

/// Invocation metadata handed to tool implementations.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Call ID the response must be correlated with
    pub tool_call_id: Option<String>,

    /// Agent whose loop is invoking the tool
    pub agent_name: Option<String>,
}

impl ToolContext {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            tool_call_id: None,
            agent_name: Some(agent_name.into()),
        }
    }

    /// Set the tool call ID for response correlation
    pub fn with_call_id(mut self, call_id: Option<String>) -> Self {
        self.tool_call_id = call_id;
        self
    }

    /// Create a tool response message with proper metadata
    pub fn text_response(&self, content: impl Into<String>) -> AgentMessage {
        self.response(MessageContent::Text(content.into()))
    }

    /// Create a JSON tool response
    pub fn json_response(&self, content: Value) -> AgentMessage {
        self.response(MessageContent::Json(content))
    }

    fn response(&self, content: MessageContent) -> AgentMessage {
        AgentMessage {
            role: MessageRole::Tool,
            content,
            tool_calls: Vec::new(),
            metadata: self.tool_call_id.as_ref().map(|id| MessageMetadata {
                tool_call_id: Some(id.clone()),
                ..MessageMetadata::default()
            }),
        }
    }
}

/// Result of a tool invocation
#[derive(Debug, Clone)]
pub enum ToolResult {
    /// Tool-result message answering the call
    Message(AgentMessage),

    /// Control transfer or state update; short-circuits the rest of the batch
    Command(Command),

    /// Pause the thread until the user answers
    Interrupt(InterruptSignal),
}

impl ToolResult {
    /// Create a simple text result
    pub fn text(ctx: &ToolContext, content: impl Into<String>) -> Self {
        Self::Message(ctx.text_response(content))
    }

    /// Create a JSON result
    pub fn json(ctx: &ToolContext, content: Value) -> Self {
        Self::Message(ctx.json_response(content))
    }
}

/// Core trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the schema definition for this tool
    fn schema(&self) -> ToolSchema;

    /// Whether the current conversation state is injected into the arguments
    /// under the `state` key.
    fn wants_state(&self) -> bool {
        false
    }

    /// Executes the tool with the given arguments and context
    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult>;
}

/// Shared handle to a tool instance
pub type ToolBox = Arc<dyn Tool>;

/// Tool registry for managing and discovering available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolBox>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool with the same name
    pub fn register(&mut self, tool: ToolBox) -> &mut Self {
        let name = tool.schema().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self
    }

    /// Register multiple tools
    pub fn register_all<I>(&mut self, tools: I) -> &mut Self
    where
        I: IntoIterator<Item = ToolBox>,
    {
        for tool in tools {
            self.register(tool);
        }
        self
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolBox> {
        self.tools.get(name)
    }

    /// Tool schemas in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Check if a tool is registered
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn schema(&self) -> ToolSchema {
            ToolSchema::no_params(self.0, "test tool")
        }

        async fn execute(&self, _args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::text(&ctx, self.0))
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register_all([
            Arc::new(Named("zeta")) as ToolBox,
            Arc::new(Named("alpha")),
            Arc::new(Named("zeta")),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["zeta", "alpha"]);
        let schemas = registry.schemas();
        assert_eq!(schemas[1].name, "alpha");
        assert!(registry.has("alpha"));
        assert!(!registry.has("beta"));
    }

    #[test]
    fn schema_serializes_as_json_schema() {
        let schema = ToolParameterSchema::object(
            "args",
            [("city".to_string(), ToolParameterSchema::string("City"))]
                .into_iter()
                .collect(),
            vec!["city".to_string()],
        );
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["city"]["type"], "string");
        assert_eq!(value["required"][0], "city");

        let parsed = ToolParameterSchema::from_json(&value).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn context_tags_responses_with_call_id() {
        let ctx = ToolContext::new("researcher").with_call_id(Some("call-7".into()));
        let msg = ctx.text_response("ok");
        assert_eq!(msg.tool_call_id(), Some("call-7"));
        assert_eq!(msg.role, MessageRole::Tool);
    }
}
