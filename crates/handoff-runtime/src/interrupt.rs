//! Parking and resuming threads that wait for user input.

use std::sync::Arc;

use handoff_core::error::SwarmError;
use handoff_core::hitl::{InterruptSignal, REQUEST_USER_INPUT_TOOL};
use handoff_core::messaging::AgentMessage;
use handoff_core::persistence::{Checkpoint, Checkpointer, ThreadId};
use handoff_core::state::ConversationState;
use tracing::{debug, info, instrument};

use crate::graph::CompiledGraph;

/// Result text for calls cut off by a command earlier in their batch.
pub const SKIPPED_CALL_TEXT: &str = "Skipped: control moved on before this call ran.";
/// Result text for calls left pending when the user starts a new request
/// instead of answering.
pub const MOVED_ON_TEXT: &str = "The user did not answer and moved on to a new request.";

/// Answers every pending call of the latest tool request with `text`.
/// Returns how many calls were answered.
pub fn answer_pending_calls(state: &mut ConversationState, text: &str) -> usize {
    let pending = state.pending_tool_calls();
    for call in &pending {
        state.push(AgentMessage::tool_result(&call.id, &call.name, text));
    }
    pending.len()
}

#[derive(Clone)]
pub struct InterruptController {
    checkpointer: Arc<dyn Checkpointer>,
}

impl InterruptController {
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self { checkpointer }
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    /// Marks the thread as waiting and writes its checkpoint, replacing any
    /// earlier one.
    #[instrument(skip(self, state, signal), fields(thread_id = %state.thread_id))]
    pub async fn park(
        &self,
        state: &mut ConversationState,
        node: &str,
        signal: &InterruptSignal,
    ) -> Result<(), SwarmError> {
        state.waiting_for_input = true;
        let checkpoint =
            Checkpoint::new(state.clone()).paused_at(node, signal.tool_call_id.clone());
        self.checkpointer
            .save(&checkpoint)
            .await
            .map_err(|err| SwarmError::Checkpoint(err.to_string()))?;
        info!(prompt = %signal.prompt, "Thread parked for user input");
        Ok(())
    }

    /// Consumes the thread's checkpoint and answers the parked call with
    /// `answer`. Returns the restored state and the node to continue at.
    #[instrument(skip(self, graph, answer))]
    pub async fn resume(
        &self,
        graph: &CompiledGraph,
        thread_id: &ThreadId,
        answer: &str,
    ) -> Result<(ConversationState, String), SwarmError> {
        let checkpoint = self
            .load(thread_id)
            .await?
            .ok_or_else(|| SwarmError::UnknownThread(thread_id.clone()))?;
        let target = graph.resume_target(&checkpoint.state, checkpoint.paused_node.as_deref());
        let mut state = checkpoint.state;

        let pending = state.pending_tool_calls();
        let parked_call = match &checkpoint.paused_tool_call_id {
            Some(id) => pending.iter().find(|call| &call.id == id),
            None => pending
                .iter()
                .find(|call| call.name == REQUEST_USER_INPUT_TOOL),
        };
        match parked_call {
            Some(call) => state.push(AgentMessage::tool_result(&call.id, &call.name, answer)),
            None => state.push(AgentMessage::user(answer)),
        }
        let skipped = answer_pending_calls(&mut state, SKIPPED_CALL_TEXT);
        state.waiting_for_input = false;

        self.delete(thread_id).await?;
        debug!(%target, skipped, "Resuming parked thread");
        Ok((state, target))
    }

    /// Whether the thread has a checkpoint to resume from.
    pub async fn is_parked(&self, thread_id: &ThreadId) -> Result<bool, SwarmError> {
        Ok(self.load(thread_id).await?.is_some())
    }

    /// Removes and returns the thread's checkpoint, if any.
    pub async fn discard(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, SwarmError> {
        let checkpoint = self.load(thread_id).await?;
        if checkpoint.is_some() {
            self.delete(thread_id).await?;
            debug!(%thread_id, "Discarded checkpoint of abandoned interrupt");
        }
        Ok(checkpoint)
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, SwarmError> {
        self.checkpointer
            .load(thread_id)
            .await
            .map_err(|err| SwarmError::Checkpoint(err.to_string()))
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<(), SwarmError> {
        self.checkpointer
            .delete(thread_id)
            .await
            .map_err(|err| SwarmError::Checkpoint(err.to_string()))
    }
}
