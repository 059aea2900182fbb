//! Turns declarative tool references into invocable tools at build time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use handoff_core::config::ToolReference;
use handoff_core::error::SwarmError;
use handoff_core::tools::{ToolBox, ToolRegistry};
use handoff_mcp::{create_mcp_tools, ToolProtocolClient};
use handoff_toolkit::manifest::{load_manifest_file, load_manifest_source};
use handoff_toolkit::prebuilt::PrebuiltRegistry;
use tracing::instrument;

/// Where a proxied tool is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedRoute {
    pub server: String,
    /// Name the server knows the tool by.
    pub tool_name: String,
}

/// An agent's resolved tool set.
#[derive(Clone, Default)]
pub struct ResolvedTools {
    pub registry: ToolRegistry,
    /// Exposed tool name → server route, for direct dispatch.
    pub proxied: HashMap<String, ProxiedRoute>,
}

impl ResolvedTools {
    pub fn add_local(&mut self, tool: ToolBox) {
        let name = tool.schema().name;
        if self.registry.has(&name) {
            tracing::warn!(tool_name = %name, "Tool name defined twice; the later definition wins");
        }
        self.proxied.remove(&name);
        self.registry.register(tool);
    }

    fn add_proxied(&mut self, tool: ToolBox, route: ProxiedRoute) {
        let name = tool.schema().name;
        if self.registry.has(&name) {
            tracing::warn!(tool_name = %name, "Tool name defined twice; the later definition wins");
        }
        self.registry.register(tool);
        self.proxied.insert(name, route);
    }
}

#[derive(Clone)]
pub struct ToolResolver {
    client: Option<Arc<dyn ToolProtocolClient>>,
    prebuilt: PrebuiltRegistry,
}

impl ToolResolver {
    pub fn new(client: Option<Arc<dyn ToolProtocolClient>>, prebuilt: PrebuiltRegistry) -> Self {
        Self { client, prebuilt }
    }

    /// Resolves every reference in order. Any failure aborts resolution.
    pub async fn resolve_all(&self, references: &[ToolReference]) -> Result<ResolvedTools, SwarmError> {
        let mut resolved = ResolvedTools::default();
        for reference in references {
            self.resolve_into(reference, &mut resolved).await?;
        }
        Ok(resolved)
    }

    #[instrument(skip(self, resolved))]
    async fn resolve_into(
        &self,
        reference: &ToolReference,
        resolved: &mut ResolvedTools,
    ) -> Result<(), SwarmError> {
        match reference {
            ToolReference::Proxied { server } => {
                let client = self.client.clone().ok_or_else(|| {
                    SwarmError::configuration(format!(
                        "tool server '{server}' referenced but no tool-protocol client is configured"
                    ))
                })?;
                let adapters = create_mcp_tools(client, server).await.map_err(|err| {
                    SwarmError::resolution(format!("listing tools of server '{server}': {err}"))
                })?;
                tracing::debug!(%server, count = adapters.len(), "Resolved proxied tools");
                for adapter in adapters {
                    let route = ProxiedRoute {
                        server: adapter.server().to_string(),
                        tool_name: adapter.original_name().to_string(),
                    };
                    resolved.add_proxied(adapter.into_toolbox(), route);
                }
            }
            ToolReference::File { path } => {
                for tool in load_manifest_file(Path::new(path), &self.prebuilt).await? {
                    resolved.add_local(tool);
                }
            }
            ToolReference::InlineCode { code } => {
                for tool in load_manifest_source(code, &self.prebuilt)? {
                    resolved.add_local(tool);
                }
            }
            ToolReference::Prebuilt { name } => {
                resolved.add_local(self.prebuilt.resolve(name)?);
            }
        }
        Ok(())
    }
}
