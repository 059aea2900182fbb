//! MCP Protocol Types
//!
//! Tool definitions and call results as exchanged with a tool-protocol server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP Tool Definition
///
/// Represents a tool that can be called by the client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct McpTool {
    /// Unique tool name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema for the tool's input parameters
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl McpTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// Result of calling a tool
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct McpToolResult {
    /// Content returned by the tool
    pub content: Vec<McpContent>,

    /// Whether this result represents an error
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl McpToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::text(text)],
            is_error: true,
        }
    }

    /// Flattens all content blocks into one text, one block per line.
    /// Images become a placeholder naming their type and size.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|content| match content {
                McpContent::Text { text } => Some(text.clone()),
                McpContent::Resource { text, .. } => text.clone(),
                McpContent::Image { data, mime_type } => {
                    Some(format!("[Image: {} ({} bytes)]", mime_type, data.len()))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP Content - represents various types of content
///
/// Content can be text, images, or embedded resources.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum McpContent {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },

    /// Image content (base64 encoded)
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded image data
        data: String,
        /// MIME type of the image
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Embedded resource content
    #[serde(rename = "resource")]
    Resource {
        /// Resource URI
        uri: String,
        /// Optional text content of the resource
        #[serde(default)]
        text: Option<String>,
        /// Optional MIME type
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
}

impl McpContent {
    /// Create text content
    pub fn text(content: impl Into<String>) -> Self {
        McpContent::Text {
            text: content.into(),
        }
    }

    /// Get text content if this is a text type
    pub fn as_text(&self) -> Option<&str> {
        match self {
            McpContent::Text { text } => Some(text),
            McpContent::Resource { text, .. } => text.as_deref(),
            _ => None,
        }
    }
}
