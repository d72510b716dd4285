// Document metadata lookup over the knowledge-base catalog.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{Tool, ToolContext};
use crate::storage::KnowledgeBaseCatalog;
use crate::types::ToolResult;

pub struct GetDocumentInfoTool {
    catalog: Arc<dyn KnowledgeBaseCatalog>,
}

impl GetDocumentInfoTool {
    pub fn new(catalog: Arc<dyn KnowledgeBaseCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for GetDocumentInfoTool {
    fn name(&self) -> String {
        "get_document_info".to_string()
    }

    fn description(&self) -> String {
        "List documents of a knowledge base with their metadata (id, title, \
         creation time). Use the returned document ids to scope \
         knowledge_search with the knowledge_ids filter."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "knowledge_base_id": {
                    "type": "string",
                    "description": "Knowledge base to inspect"
                }
            },
            "required": ["knowledge_base_id"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let Some(kb_id) = args["knowledge_base_id"].as_str().filter(|s| !s.is_empty()) else {
            return ToolResult::err("knowledge_base_id is required");
        };

        let kb = match self.catalog.get_knowledge_base(kb_id).await {
            Ok(Some(kb)) => kb,
            Ok(None) => return ToolResult::err(format!("knowledge base not found: {kb_id}")),
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let mut text = format!("Knowledge base: {} ({})\n", kb.name, kb.id);
        if !kb.description.is_empty() {
            text.push_str(&format!("Description: {}\n", kb.description));
        }
        text.push_str(&format!("Documents ({}):\n", kb.recent_documents.len()));
        for doc in &kb.recent_documents {
            text.push_str(&format!(
                "  - {} (id: {}, added {})\n",
                doc.title,
                doc.id,
                doc.created_at.format("%Y-%m-%d")
            ));
        }

        ToolResult::ok(text).with_data(json!({
            "knowledge_base_id": kb.id,
            "name": kb.name,
            "documents": kb.recent_documents,
            "display_type": "document_info",
        }))
    }
}
