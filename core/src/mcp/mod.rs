//! Model Context Protocol contracts.
//!
//! The wire transport (stdio, SSE, ...) is an external collaborator. The
//! core consumes remote tool servers through the [`McpClient`] contract
//! only: list the advertised tools once at startup, call them by name at
//! execution time. Connected clients are surfaced to the agent as
//! `mcp_{service}_{tool}` registry entries by
//! [`crate::tools::register_mcp_tools`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Request timeout")]
    Timeout,
}

/// Tool advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Flattened tool-call outcome: the server's text content joined into one
/// string, plus its error flag.
#[derive(Debug, Clone)]
pub struct McpToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// Client contract for one connected MCP service.
///
/// Implementations own the connection lifecycle and the protocol details;
/// the core never sees either. A call that the *server* reports as failed
/// comes back as `Ok` with `is_error = true`, so the adapter can turn it
/// into a failing tool result instead of a transport fault.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Service name used to compose `mcp_{service}_{tool}` registry names.
    fn service_name(&self) -> &str;

    /// All tools the service advertises.
    async fn list_tools(&self) -> Result<Vec<McpToolSpec>, McpError>;

    /// Call a tool by its server-side name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<McpToolOutcome, McpError>;
}
