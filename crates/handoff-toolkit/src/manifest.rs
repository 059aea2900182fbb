//! JSON tool manifests.
//!
//! A manifest is a JSON document whose top-level `tools` array declares a
//! tool collection:
//!
//! ```json
//! {
//!   "tools": [
//!     {"name": "word_count", "description": "Count words", "kind": "command",
//!      "program": "wc", "args": ["-w"],
//!      "parameters": {"type": "object", "properties": {"text": {"type": "string"}}}},
//!     {"name": "clock", "description": "What time is it", "kind": "prebuilt", "target": "current_time"},
//!     {"name": "policy", "description": "Refund policy", "kind": "static", "text": "30 days"}
//!   ]
//! }
//! ```
//!
//! Manifests come from files or inline strings. `command` entries run local
//! programs, so only load manifests from trusted configuration.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use handoff_core::error::SwarmError;
use handoff_core::tools::{Tool, ToolBox, ToolContext, ToolParameterSchema, ToolResult, ToolSchema};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::builder::ToolBuilder;
use crate::prebuilt::PrebuiltRegistry;

pub const MANIFEST_EXTENSION: &str = "json";
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
struct ToolManifest {
    #[serde(default)]
    tools: Option<Vec<Value>>,
}

/// One validated manifest element.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub name: String,
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
    #[serde(default)]
    pub wants_state: bool,
    #[serde(flatten)]
    pub kind: ManifestToolKind,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestToolKind {
    /// Spawns `program`, writes the JSON arguments to stdin, returns stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Exposes a built-in registry tool under this entry's name.
    Prebuilt { target: String },
    /// Always returns the same text.
    Static { text: String },
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parses and validates manifest text, returning its entries in order.
pub fn parse_manifest(source: &str) -> Result<Vec<ManifestEntry>, String> {
    let manifest: ToolManifest =
        serde_json::from_str(source).map_err(|err| format!("manifest is not valid JSON: {err}"))?;
    let raw = manifest
        .tools
        .ok_or_else(|| "manifest has no `tools` collection".to_string())?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());
    for (position, value) in raw.into_iter().enumerate() {
        let entry: ManifestEntry = serde_json::from_value(value)
            .map_err(|err| format!("tool #{position} is malformed: {err}"))?;
        if !is_valid_tool_name(&entry.name) {
            return Err(format!(
                "tool #{position} has invalid name '{}': expected 1-{MAX_NAME_LEN} of [A-Za-z0-9_-]",
                entry.name
            ));
        }
        if entry.description.trim().is_empty() {
            return Err(format!("tool '{}' has an empty description", entry.name));
        }
        if entry.parameters.get("type").and_then(Value::as_str) != Some("object") {
            return Err(format!(
                "tool '{}' parameters must be a JSON Schema of type object",
                entry.name
            ));
        }
        if !seen.insert(entry.name.clone()) {
            return Err(format!("duplicate tool name '{}'", entry.name));
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Turns validated entries into fresh tool instances.
pub fn instantiate(
    entries: Vec<ManifestEntry>,
    prebuilt: &PrebuiltRegistry,
) -> Result<Vec<ToolBox>, SwarmError> {
    entries
        .into_iter()
        .map(|entry| {
            let parameters = ToolParameterSchema::from_json(&entry.parameters).map_err(|err| {
                SwarmError::resolution(format!("tool '{}' has an unusable schema: {err}", entry.name))
            })?;
            let schema = ToolSchema::new(entry.name, entry.description, parameters);
            let tool: ToolBox = match entry.kind {
                ManifestToolKind::Command {
                    program,
                    args,
                    timeout_secs,
                } => std::sync::Arc::new(CommandTool {
                    schema,
                    program,
                    args,
                    timeout: timeout_secs.map(Duration::from_secs),
                    wants_state: entry.wants_state,
                }),
                ManifestToolKind::Prebuilt { target } => std::sync::Arc::new(AliasTool {
                    schema,
                    inner: prebuilt.resolve(&target)?,
                }),
                ManifestToolKind::Static { text } => {
                    let ToolSchema {
                        name,
                        description,
                        parameters,
                    } = schema;
                    ToolBuilder::new(name, description)
                        .with_parameters(parameters)
                        .with_state_injection(entry.wants_state)
                        .build_sync(move |_args, ctx| Ok(ToolResult::text(&ctx, text.clone())))
                }
            };
            Ok(tool)
        })
        .collect()
}

/// Loads a manifest file. Path, extension and content problems are all
/// configuration errors.
pub async fn load_manifest_file(
    path: &Path,
    prebuilt: &PrebuiltRegistry,
) -> Result<Vec<ToolBox>, SwarmError> {
    let extension = path.extension().and_then(|ext| ext.to_str());
    if extension != Some(MANIFEST_EXTENSION) {
        return Err(SwarmError::configuration(format!(
            "tool file '{}' must have a .{MANIFEST_EXTENSION} extension",
            path.display()
        )));
    }
    let source = tokio::fs::read_to_string(path).await.map_err(|err| {
        SwarmError::configuration(format!("tool file '{}' is unreadable: {err}", path.display()))
    })?;
    let entries = parse_manifest(&source).map_err(|err| {
        SwarmError::configuration(format!("tool file '{}': {err}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), count = entries.len(), "Loaded tool manifest");
    instantiate(entries, prebuilt)
}

/// Evaluates an inline manifest. Each call yields fresh tool instances.
pub fn load_manifest_source(
    source: &str,
    prebuilt: &PrebuiltRegistry,
) -> Result<Vec<ToolBox>, SwarmError> {
    let entries = parse_manifest(source)
        .map_err(|err| SwarmError::resolution(format!("inline tool collection: {err}")))?;
    instantiate(entries, prebuilt)
}

/// Runs a local program per call.
pub struct CommandTool {
    schema: ToolSchema,
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    wants_state: bool,
}

impl CommandTool {
    async fn run(&self, input: Vec<u8>) -> anyhow::Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| anyhow::anyhow!("failed to spawn '{}': {err}", self.program))?;

        // Feed stdin alongside reading stdout so a program echoing its input
        // cannot block on a full pipe.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&input).await?;
                stdin.shutdown().await
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            if let Err(err) = writer.await? {
                tracing::debug!(program = %self.program, error = %err, "Program stopped reading its input");
            }
        }
        if !output.status.success() {
            anyhow::bail!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn wants_state(&self) -> bool {
        self.wants_state
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        tracing::debug!(tool_name = %self.schema.name, program = %self.program, "Running command tool");
        let input = serde_json::to_vec(&args)?;
        let stdout = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(input))
                .await
                .map_err(|_| anyhow::anyhow!("'{}' timed out after {limit:?}", self.program))??,
            None => self.run(input).await?,
        };
        Ok(ToolResult::text(&ctx, stdout))
    }
}

/// A registry tool exposed under a manifest-chosen name and schema.
pub struct AliasTool {
    schema: ToolSchema,
    inner: ToolBox,
}

#[async_trait]
impl Tool for AliasTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn wants_state(&self) -> bool {
        self.inner.wants_state()
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        self.inner.execute(args, ctx).await
    }
}
