//! Toolkit of tool sources for handoff agents
//!
//! This crate provides:
//! - Tool builder utilities for closures and functions
//! - The prebuilt registry (`current_time`, `http_fetch`)
//! - JSON tool manifests loaded from files or inline configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use handoff_toolkit::{tool_sync, ToolParameterSchema, ToolResult};
//!
//! let greet = tool_sync(
//!     "greet",
//!     "Greets the user",
//!     ToolParameterSchema::empty_object(),
//!     |_args, ctx| Ok(ToolResult::text(&ctx, "hello")),
//! );
//! ```

pub mod builder;
pub mod manifest;
pub mod prebuilt;

// Re-export core tool types for convenience
pub use handoff_core::tools::{
    Tool, ToolBox, ToolContext, ToolParameterSchema, ToolRegistry, ToolResult, ToolSchema,
};

pub use builder::{tool, tool_sync, FunctionTool, ToolBuilder};
pub use manifest::{
    load_manifest_file, load_manifest_source, parse_manifest, ManifestEntry, ManifestToolKind,
};
pub use prebuilt::{CurrentTimeTool, HttpFetchTool, PrebuiltRegistry};
