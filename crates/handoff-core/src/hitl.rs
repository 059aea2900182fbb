use serde::{Deserialize, Serialize};

/// Name of the synthesized tool every agent uses to pause for user input.
pub const REQUEST_USER_INPUT_TOOL: &str = "request_user_input";

/// Pause request raised when an agent needs more information from the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptSignal {
    pub prompt: String,
    /// Agent that raised the interrupt.
    pub caller: String,
    /// The pending `request_user_input` call the user's answer will satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl InterruptSignal {
    pub fn new(prompt: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            caller: caller.into(),
            tool_call_id: None,
        }
    }

    pub fn with_call_id(mut self, call_id: Option<String>) -> Self {
        self.tool_call_id = call_id;
        self
    }
}
