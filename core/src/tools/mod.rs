//! Tool registry and built-in tools for the agent engine.

mod database_query;
mod document_info;
mod graph_query;
mod knowledge_search;
mod mcp;
mod registry;
mod related_chunks;
mod thinking;
mod todo_write;
mod traits;

pub use database_query::DatabaseQueryTool;
pub use document_info::GetDocumentInfoTool;
pub use graph_query::{GraphBackend, QueryKnowledgeGraphTool};
pub use knowledge_search::KnowledgeSearchTool;
pub use mcp::{register_mcp_tools, McpTool};
pub use registry::ToolRegistry;
pub use related_chunks::GetRelatedChunksTool;
pub use thinking::ThinkingTool;
pub use todo_write::TodoWriteTool;
pub use traits::{Tool, ToolContext};

use crate::types::SearchResult;
use serde_json::Value;

/// Default tool set exposed to agents that do not restrict `allowed_tools`.
pub fn default_allowed_tools() -> Vec<String> {
    [
        "thinking",
        "todo_write",
        "knowledge_search",
        "get_related_chunks",
        "query_knowledge_graph",
        "get_document_info",
        "database_query",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Relevance tier used when formatting results for the model.
pub(crate) fn relevance_level(score: f64) -> &'static str {
    if score >= 0.8 {
        "high"
    } else if score >= 0.6 {
        "medium"
    } else {
        "low"
    }
}

/// Pull [`SearchResult`]s out of a tool result's structured data. Tools that
/// retrieve knowledge put their hits under `data.references`; the agent
/// accumulates these into the answer's knowledge references.
pub fn extract_references(data: Option<&Value>) -> Vec<SearchResult> {
    data.and_then(|d| d.get("references"))
        .and_then(|refs| serde_json::from_value(refs.clone()).ok())
        .unwrap_or_default()
}
