//! MCP protocol types
//!
//! This module contains the protocol-level data the engine exchanges with a
//! tool-protocol server:
//! - Tool definitions and call results
//! - Content blocks (text, images, resources)
//! - Error handling

pub mod error;
pub mod types;

pub use error::McpError;
pub use types::*;
