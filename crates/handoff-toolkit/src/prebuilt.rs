//! Static registry of built-in tools addressable by name from agent
//! configuration.

use async_trait::async_trait;
use chrono::Utc;
use futures::{Stream, StreamExt};
use handoff_core::error::SwarmError;
use handoff_core::tools::{Tool, ToolBox, ToolContext, ToolParameterSchema, ToolResult, ToolSchema};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default cap on the body text `http_fetch` returns.
pub const DEFAULT_FETCH_LIMIT: usize = 4000;

pub type PrebuiltFactory = Arc<dyn Fn() -> anyhow::Result<ToolBox> + Send + Sync>;

/// Name → factory map. Every lookup yields a fresh tool instance so agents
/// never share tool state.
#[derive(Clone)]
pub struct PrebuiltRegistry {
    factories: BTreeMap<String, PrebuiltFactory>,
}

impl PrebuiltRegistry {
    /// A registry with no tools.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// The built-in tools: `current_time` and `http_fetch`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("current_time", || Ok(Arc::new(CurrentTimeTool) as ToolBox));
        registry.register("http_fetch", || {
            Ok(Arc::new(HttpFetchTool::new(DEFAULT_FETCH_LIMIT)?) as ToolBox)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<ToolBox> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Instantiates the named tool.
    pub fn resolve(&self, name: &str) -> Result<ToolBox, SwarmError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SwarmError::NotFound(name.to_string()))?;
        factory().map_err(|err| {
            SwarmError::resolution(format!("prebuilt tool '{name}' failed to start: {err}"))
        })
    }
}

impl Default for PrebuiltRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Returns the current UTC time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::no_params(
            "current_time",
            "Get the current date and time in UTC (RFC 3339)",
        )
    }

    async fn execute(&self, _args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        let now = Utc::now();
        Ok(ToolResult::text(
            &ctx,
            json!({"utc": now.to_rfc3339(), "unix": now.timestamp()}).to_string(),
        ))
    }
}

/// HTTP GET returning the status and a truncated body.
pub struct HttpFetchTool {
    client: Client,
    max_chars: usize,
}

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    max_chars: Option<usize>,
}

impl HttpFetchTool {
    pub fn new(max_chars: usize) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().user_agent("handoff/0.1").build()?,
            max_chars,
        })
    }
}

/// Cuts `text` to at most `limit` characters, marking the cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Reads body chunks until more than `limit` characters are certainly
/// buffered, then stops pulling from the connection.
async fn read_capped<S, B, E>(mut chunks: S, limit: usize) -> anyhow::Result<String>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<anyhow::Error>,
{
    // A character is at most four bytes.
    let byte_cap = limit.saturating_add(1).saturating_mul(4);
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        body.extend_from_slice(chunk.map_err(Into::<anyhow::Error>::into)?.as_ref());
        if body.len() >= byte_cap {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn schema(&self) -> ToolSchema {
        let mut properties = HashMap::new();
        properties.insert(
            "url".to_string(),
            ToolParameterSchema::string("Absolute http(s) URL to fetch"),
        );
        properties.insert(
            "max_chars".to_string(),
            ToolParameterSchema::integer("Maximum number of body characters to return"),
        );
        ToolSchema::new(
            "http_fetch",
            "Fetch a web page or API endpoint with HTTP GET",
            ToolParameterSchema::object("Fetch parameters", properties, vec!["url".to_string()]),
        )
    }

    async fn execute(&self, args: Value, ctx: ToolContext) -> anyhow::Result<ToolResult> {
        let args: FetchArgs = serde_json::from_value(args)?;
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            anyhow::bail!("only http and https URLs are supported: {}", args.url);
        }
        tracing::debug!(url = %args.url, "Fetching URL");

        let response = self.client.get(&args.url).send().await?;
        let status = response.status();
        let limit = args.max_chars.unwrap_or(self.max_chars).min(self.max_chars);
        let body = read_capped(response.bytes_stream(), limit).await?;
        Ok(ToolResult::text(
            &ctx,
            format!("HTTP {}\n{}", status.as_u16(), truncate_chars(&body, limit)),
        ))
    }
}
