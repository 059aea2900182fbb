//! Tools every agent node is synthesized with.

use std::collections::HashMap;

use async_trait::async_trait;
use handoff_core::command::Command;
use handoff_core::hitl::{InterruptSignal, REQUEST_USER_INPUT_TOOL};
use handoff_core::tools::{Tool, ToolContext, ToolParameterSchema, ToolResult, ToolSchema};
use serde::Deserialize;
use serde_json::Value;

pub const TRANSFER_PREFIX: &str = "transfer_to_";
pub const DEFAULT_INPUT_PROMPT: &str = "Please provide more information.";

pub fn transfer_tool_name(target: &str) -> String {
    format!("{TRANSFER_PREFIX}{target}")
}

/// Pauses the thread until the user answers `prompt`.
pub struct RequestUserInputTool {
    agent: String,
}

#[derive(Deserialize)]
struct RequestUserInputArgs {
    #[serde(default)]
    prompt: Option<String>,
}

impl RequestUserInputTool {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

#[async_trait]
impl Tool for RequestUserInputTool {
    fn schema(&self) -> ToolSchema {
        let mut properties = HashMap::new();
        properties.insert(
            "prompt".to_string(),
            ToolParameterSchema::string("Question to show the user"),
        );
        properties.insert(
            "caller".to_string(),
            ToolParameterSchema::string("Your own agent name, so the answer comes back to you"),
        );
        ToolSchema::new(
            REQUEST_USER_INPUT_TOOL,
            "Pause the current task and wait for the user to provide more information.",
            ToolParameterSchema::object(
                "Request user input parameters",
                properties,
                vec!["prompt".to_string()],
            ),
        )
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        let args: RequestUserInputArgs = serde_json::from_value(args)?;
        let prompt = args
            .prompt
            .filter(|prompt| !prompt.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INPUT_PROMPT.to_string());
        tracing::info!(agent = %self.agent, %prompt, "Agent requested user input");
        Ok(ToolResult::Interrupt(
            InterruptSignal::new(prompt, self.agent.clone()).with_call_id(ctx.tool_call_id),
        ))
    }
}

/// Hands control to `target` in the orchestrating graph.
pub struct TransferTool {
    from: String,
    target: String,
}

impl TransferTool {
    pub fn new(from: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            target: target.into(),
        }
    }
}

#[async_trait]
impl Tool for TransferTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::no_params(
            transfer_tool_name(&self.target),
            format!(
                "Transfer control to the {} assistant, who continues the task.",
                self.target
            ),
        )
    }

    async fn execute(&self, _args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        tracing::debug!(from = %self.from, to = %self.target, "Handing off");
        let record = ctx.text_response(format!(
            "Transferred control from {} to {}.",
            self.from, self.target
        ));
        Ok(ToolResult::Command(Command::handoff(
            self.target.clone(),
            vec![record],
        )))
    }
}
