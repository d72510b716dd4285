// Knowledge-graph query tool. The graph itself is an external collaborator;
// the tool only validates arguments and shapes the result.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{Tool, ToolContext};
use crate::types::ToolResult;
use crate::Result;

/// External graph contract: entity/relation queries against one knowledge
/// base.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn query(&self, kb_id: &str, query: &str, limit: usize) -> Result<Value>;
}

pub struct QueryKnowledgeGraphTool {
    backend: Arc<dyn GraphBackend>,
}

impl QueryKnowledgeGraphTool {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for QueryKnowledgeGraphTool {
    fn name(&self) -> String {
        "query_knowledge_graph".to_string()
    }

    fn description(&self) -> String {
        "Query entity and relation information from the knowledge graph of a \
         knowledge base. Useful for questions about how concepts relate to \
         each other rather than about passage content."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "knowledge_base_id": {
                    "type": "string",
                    "description": "Knowledge base whose graph to query"
                },
                "query": {
                    "type": "string",
                    "description": "Entity name or relation query"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum relations to return (default: 10)",
                    "default": 10,
                    "minimum": 1,
                    "maximum": 50
                }
            },
            "required": ["knowledge_base_id", "query"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(kb_id) = args["knowledge_base_id"].as_str().filter(|s| !s.is_empty()) else {
            return ToolResult::err("knowledge_base_id is required");
        };
        let Some(query) = args["query"].as_str().filter(|s| !s.is_empty()) else {
            return ToolResult::err("query is required");
        };
        let limit = args["limit"].as_u64().unwrap_or(10).clamp(1, 50) as usize;

        match self.backend.query(kb_id, query, limit).await {
            Ok(graph) => ToolResult::ok(format!(
                "Knowledge graph results for \"{query}\":\n{}",
                serde_json::to_string_pretty(&graph).unwrap_or_default()
            ))
            .with_data(json!({
                "knowledge_base_id": kb_id,
                "query": query,
                "graph": graph,
                "display_type": "knowledge_graph",
            })),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}
