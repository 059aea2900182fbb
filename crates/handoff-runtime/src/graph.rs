//! Compiles an agent roster into the routable graph a thread runs on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use handoff_core::config::{AgentSpec, DECISION_MAKER, INTERRUPT_NODE};
use handoff_core::error::SwarmError;
use handoff_core::hitl::REQUEST_USER_INPUT_TOOL;
use handoff_core::llm::{BoundModel, LanguageModel};
use handoff_core::prompts::{
    agent_system_prompt, decision_maker_system_prompt, DECISION_MAKER_DESCRIPTION,
};
use handoff_core::state::ConversationState;
use handoff_mcp::ToolProtocolClient;
use handoff_toolkit::prebuilt::PrebuiltRegistry;
use tracing::{debug, info, instrument};

use crate::builtin::{RequestUserInputTool, TransferTool};
use crate::node::AgentNode;
use crate::resolver::ToolResolver;

const DEFAULT_DECISION_MAKER_PROMPT: &str =
    "Decide whether the user's request is complete. If it is, answer the user directly.";

/// Builds a [`CompiledGraph`] from a roster.
pub struct GraphBuilder {
    model: Arc<dyn LanguageModel>,
    model_id: Option<String>,
    mcp_client: Option<Arc<dyn ToolProtocolClient>>,
    prebuilt: PrebuiltRegistry,
}

impl GraphBuilder {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            model_id: None,
            mcp_client: None,
            prebuilt: PrebuiltRegistry::with_defaults(),
        }
    }

    pub fn with_model_id(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn with_mcp_client(mut self, client: Option<Arc<dyn ToolProtocolClient>>) -> Self {
        self.mcp_client = client;
        self
    }

    pub fn with_prebuilt(mut self, prebuilt: PrebuiltRegistry) -> Self {
        self.prebuilt = prebuilt;
        self
    }

    /// Validates the roster, resolves every tool reference and builds one
    /// node per agent plus the decision-maker.
    #[instrument(skip_all, fields(agents = roster.len()))]
    pub async fn build(&self, roster: &[AgentSpec]) -> Result<CompiledGraph, SwarmError> {
        validate_roster(roster)?;

        let decision_maker = roster
            .iter()
            .find(|spec| spec.name == DECISION_MAKER)
            .cloned()
            .unwrap_or_else(|| {
                AgentSpec::new(DECISION_MAKER, DECISION_MAKER_DESCRIPTION)
                    .with_prompt(DEFAULT_DECISION_MAKER_PROMPT)
            });
        let members: Vec<&AgentSpec> = roster
            .iter()
            .filter(|spec| spec.name != DECISION_MAKER)
            .collect();

        let resolver = ToolResolver::new(self.mcp_client.clone(), self.prebuilt.clone());
        let mut nodes = HashMap::with_capacity(members.len() + 1);

        let targets: Vec<String> = members.iter().map(|spec| spec.name.clone()).collect();
        let prompt = decision_maker_system_prompt(&decision_maker, roster);
        let node = self
            .build_node(&resolver, &decision_maker, prompt, &targets)
            .await?;
        nodes.insert(DECISION_MAKER.to_string(), Arc::new(node));

        for spec in members {
            let mut targets = spec.hands_off.clone();
            if !targets.iter().any(|target| target == DECISION_MAKER) {
                targets.push(DECISION_MAKER.to_string());
            }
            let prompt = agent_system_prompt(spec, roster);
            let node = self.build_node(&resolver, spec, prompt, &targets).await?;
            nodes.insert(spec.name.clone(), Arc::new(node));
        }

        info!(nodes = nodes.len(), "Compiled agent graph");
        Ok(CompiledGraph {
            nodes,
            entry: DECISION_MAKER.to_string(),
        })
    }

    async fn build_node(
        &self,
        resolver: &ToolResolver,
        spec: &AgentSpec,
        system_prompt: String,
        targets: &[String],
    ) -> Result<AgentNode, SwarmError> {
        let mut tools = resolver.resolve_all(&spec.tools).await?;
        tools.add_local(Arc::new(RequestUserInputTool::new(&spec.name)));
        let mut seen = HashSet::new();
        for target in targets.iter().filter(|target| seen.insert(target.as_str())) {
            tools.add_local(Arc::new(TransferTool::new(&spec.name, target)));
        }
        debug!(agent = %spec.name, tools = ?tools.registry.names(), "Built agent node");

        let model = BoundModel::new(self.model.clone(), self.model_id.clone());
        Ok(AgentNode::new(
            &spec.name,
            system_prompt,
            model,
            tools,
            self.mcp_client.clone(),
        ))
    }
}

fn validate_roster(roster: &[AgentSpec]) -> Result<(), SwarmError> {
    let mut names = HashSet::with_capacity(roster.len());
    for spec in roster {
        if spec.name.is_empty()
            || !spec
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(SwarmError::configuration(format!(
                "invalid agent name '{}': use letters, digits, '_' or '-'",
                spec.name
            )));
        }
        if spec.name == INTERRUPT_NODE {
            return Err(SwarmError::configuration(format!(
                "agent name '{INTERRUPT_NODE}' is reserved"
            )));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(SwarmError::configuration(format!(
                "agent '{}' is defined twice",
                spec.name
            )));
        }
    }

    for spec in roster {
        if let Some(target) = spec
            .hands_off
            .iter()
            .find(|target| target.as_str() != DECISION_MAKER && !names.contains(target.as_str()))
        {
            return Err(SwarmError::configuration(format!(
                "agent '{}' hands off to '{target}', which is not in the roster",
                spec.name
            )));
        }
    }
    Ok(())
}

/// Agent nodes of one thread, keyed by name.
pub struct CompiledGraph {
    nodes: HashMap<String, Arc<AgentNode>>,
    entry: String,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.names())
            .field("entry", &self.entry)
            .finish()
    }
}

impl CompiledGraph {
    pub fn node(&self, name: &str) -> Option<&Arc<AgentNode>> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Node names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Where a fresh turn starts.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Where a resumed thread continues: the node that paused if it is known,
    /// otherwise the `caller` argument of the pending `request_user_input`
    /// call, otherwise the decision-maker.
    pub fn resume_target(&self, state: &ConversationState, paused_node: Option<&str>) -> String {
        if let Some(node) = paused_node.filter(|node| self.contains(node)) {
            return node.to_string();
        }
        self.route_from_interrupt(state)
    }

    /// Conditional edge out of the interrupt node.
    pub fn route_from_interrupt(&self, state: &ConversationState) -> String {
        let caller = state
            .pending_tool_calls()
            .into_iter()
            .find(|call| call.name == REQUEST_USER_INPUT_TOOL)
            .and_then(|call| call.args.get("caller")?.as_str().map(str::to_string));
        match caller {
            Some(caller) if self.contains(&caller) => caller,
            _ => self.entry.clone(),
        }
    }
}
