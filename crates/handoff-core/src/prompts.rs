use crate::config::{AgentSpec, DECISION_MAKER};

/// Fixed description of the decision-maker, listed first among every agent's
/// collaborators.
pub const DECISION_MAKER_DESCRIPTION: &str =
    "The coordinator. Plans the user's request step by step and hands each step to the most suitable assistant.";

pub const AGENT_PROMPT_TEMPLATE: &str = r#"You are {agent_name}, a helpful AI assistant. Your responsibility: {agent_description}.
You are collaborating with other assistants to complete the user's task.
These are the other assistants:
{assistants}
---
Follow these rules while working:
1. Work in a think, act, observe loop.
    1. Think: decide what the current task needs and how to achieve it.
    2. Act: decide whether a tool is needed to make progress.
    3. Observe: adjust your thinking based on the feedback you get.
2. Share your thinking before you do anything.
3. Only focus on what the current step needs. Do not plan later steps.
4. If you need more information from the user, call the request_user_input tool.
5. If you cannot complete the current step, transfer control back to decision_maker.
6. When your work is done, transfer control back to decision_maker."#;

pub const DECISION_MAKER_PROMPT_TEMPLATE: &str = r#"You are decision_maker, a helpful AI assistant. Your responsibility is to plan the user's request step by step and hand each step to a suitable assistant.
Be proactive instead of waiting for the user to spell everything out.
You collaborate with these assistants:
{assistants}
---
Follow these rules while planning:
1. Work in a think, act, observe loop.
    1. Think: decide what the task needs and how to achieve it.
    2. Act: decide whether to transfer the current step to another assistant.
    3. Observe: adjust your plan based on the feedback you get.
2. Share your thinking before you do anything.
3. Keep the whole task in view, not just the current step.
---
Rules for completing the task:
1. Answer general questions such as greetings or small talk directly.
2. For a task that needs planning, write out the steps first, then assign each step.
3. Use the transfer_to_<assistant> tools to hand control to another assistant.
4. If you need more information from the user, call the request_user_input tool.
5. When the task is complete, answer the user without calling any tool."#;

/// Renders `name: description` lines.
fn describe<'a>(agents: impl Iterator<Item = &'a AgentSpec>) -> Vec<String> {
    agents
        .map(|agent| format!("{}: {}", agent.name, agent.description))
        .collect()
}

fn with_own_prompt(prefix: String, prompt: &str) -> String {
    format!("{prefix}\n---\n{prompt}")
}

/// System prompt of a roster agent: the template filled with its identity,
/// the decision-maker and every roster member in its hands_off set.
pub fn agent_system_prompt(agent: &AgentSpec, roster: &[AgentSpec]) -> String {
    let mut lines = vec![format!("{DECISION_MAKER}: {DECISION_MAKER_DESCRIPTION}")];
    lines.extend(describe(roster.iter().filter(|other| {
        other.name != agent.name
            && other.name != DECISION_MAKER
            && agent.hands_off.contains(&other.name)
    })));
    let prefix = AGENT_PROMPT_TEMPLATE
        .replace("{agent_name}", &agent.name)
        .replace("{agent_description}", &agent.description)
        .replace("{assistants}", &lines.join("\n"));
    with_own_prompt(prefix, &agent.prompt)
}

/// System prompt of the decision-maker, listing every roster member.
pub fn decision_maker_system_prompt(decision_maker: &AgentSpec, roster: &[AgentSpec]) -> String {
    let lines = describe(roster.iter().filter(|agent| agent.name != DECISION_MAKER));
    let prefix = DECISION_MAKER_PROMPT_TEMPLATE.replace("{assistants}", &lines.join("\n"));
    with_own_prompt(prefix, &decision_maker.prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<AgentSpec> {
        vec![
            AgentSpec::new("researcher", "finds facts")
                .with_prompt("Cite sources.")
                .with_hands_off(["writer"]),
            AgentSpec::new("writer", "writes prose"),
            AgentSpec::new("critic", "reviews drafts"),
        ]
    }

    #[test]
    fn agent_prompt_lists_only_handoff_targets() {
        let roster = roster();
        let prompt = agent_system_prompt(&roster[0], &roster);
        assert!(prompt.starts_with("You are researcher"));
        assert!(prompt.contains("finds facts"));
        assert!(prompt.contains(&format!("decision_maker: {DECISION_MAKER_DESCRIPTION}")));
        assert!(prompt.contains("writer: writes prose"));
        assert!(!prompt.contains("critic: reviews drafts"));
        assert!(prompt.ends_with("\n---\nCite sources."));
    }

    #[test]
    fn decision_maker_prompt_lists_whole_roster() {
        let roster = roster();
        let dm = AgentSpec::new(DECISION_MAKER, "coordinator").with_prompt("Be brief.");
        let prompt = decision_maker_system_prompt(&dm, &roster);
        for agent in &roster {
            assert!(prompt.contains(&format!("{}: {}", agent.name, agent.description)));
        }
        assert!(prompt.ends_with("Be brief."));
    }
}
