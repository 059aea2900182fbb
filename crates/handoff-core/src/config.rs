//! Per-conversation agent configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SwarmError;

/// Node name of the decision-maker agent.
pub const DECISION_MAKER: &str = "decision_maker";

/// Reserved node name of the interrupt node.
pub const INTERRUPT_NODE: &str = "interrupt";

/// Declarative pointer to a tool source, resolved once when the graph is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ToolReference {
    /// Every tool exposed by a named tool-protocol server.
    #[serde(alias = "mcp")]
    Proxied {
        #[serde(alias = "mcp_server")]
        server: String,
    },
    /// A JSON tool manifest on disk.
    #[serde(alias = "local_file")]
    File {
        #[serde(alias = "local_file_path")]
        path: String,
    },
    /// A tool manifest supplied inline. Elevated trust: only load this from
    /// trusted configuration, never from end-user text.
    #[serde(alias = "python")]
    InlineCode {
        #[serde(alias = "python_code")]
        code: String,
    },
    /// A tool from the built-in registry.
    #[serde(alias = "prebuild")]
    Prebuilt {
        #[serde(alias = "prebuild_name")]
        name: String,
    },
}

/// One agent's identity and configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<ToolReference>,
    #[serde(default)]
    pub hands_off: Vec<String>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt: String::new(),
            tools: Vec::new(),
            hands_off: Vec::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_tool(mut self, tool: ToolReference) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_hands_off<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hands_off = names.into_iter().map(Into::into).collect();
        self
    }

    /// Parses a roster from JSON, reporting unknown tool sources and
    /// malformed entries as configuration errors.
    pub fn parse_roster(value: Value) -> Result<Vec<AgentSpec>, SwarmError> {
        serde_json::from_value(value)
            .map_err(|err| SwarmError::configuration(format!("invalid agent roster: {err}")))
    }
}
