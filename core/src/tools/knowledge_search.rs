// Unified knowledge-base search tool over the hybrid search core.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::relevance_level;
use super::traits::{Tool, ToolContext};
use crate::search::{HybridSearchOutput, HybridSearchRequest, HybridSearcher};
use crate::types::ToolResult;

/// Search within knowledge bases with flexible query modes.
pub struct KnowledgeSearchTool {
    searcher: Arc<HybridSearcher>,
    allowed_kbs: Vec<String>,
}

impl KnowledgeSearchTool {
    pub fn new(searcher: Arc<HybridSearcher>, allowed_kbs: Vec<String>) -> Self {
        Self { searcher, allowed_kbs }
    }

    fn parse_string_array(value: &Value) -> Vec<String> {
        value
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn format_output(output: &HybridSearchOutput, request: &HybridSearchRequest) -> ToolResult {
        if output.results.is_empty() {
            return ToolResult::ok(format!(
                "No relevant content found in {} knowledge base(s).",
                request.kb_ids.len()
            ))
            .with_data(json!({
                "knowledge_base_ids": request.kb_ids,
                "results": [],
                "references": [],
                "count": 0,
                "display_type": "search_results",
            }));
        }

        let mut text = String::from("=== Search Results ===\n");
        text.push_str(&format!("Knowledge Bases: {:?}\n", request.kb_ids));
        text.push_str(&format!("Search Mode: {}\n", output.search_mode));
        if let Some(q) = &request.query {
            text.push_str(&format!("Query: {q}\n"));
        }
        text.push_str(&format!(
            "Found {} relevant results (deduplicated)",
            output.results.len()
        ));
        if output.total_before_filter > output.results.len() {
            text.push_str(&format!(" (filtered from {})", output.total_before_filter));
        }
        text.push_str("\n\n=== Detailed Results ===\n");

        let mut formatted = Vec::with_capacity(output.results.len());
        for (i, hit) in output.results.iter().enumerate() {
            let r = &hit.result;
            let level = relevance_level(r.score);
            text.push_str(&format!("\nResult #{}:\n", i + 1));
            text.push_str(&format!("  Relevance: {:.2} ({level})\n", r.score));
            text.push_str(&format!(
                "  Match Type: {:?} (query: \"{}\")\n",
                r.match_type, hit.source_query
            ));
            text.push_str(&format!("  Content: {}\n", r.content));
            text.push_str(&format!("  [chunk_id: {}]\n", r.id));

            formatted.push(json!({
                "result_index": i + 1,
                "chunk_id": r.id,
                "content": r.content,
                "score": r.score,
                "relevance_level": level,
                "knowledge_id": r.knowledge_id,
                "knowledge_title": r.knowledge_title,
                "match_type": r.match_type,
                "source_query": hit.source_query,
                "query_type": hit.query_type.as_str(),
            }));
        }

        text.push_str(
            "\n=== Usage Guidelines ===\n\
             - High relevance (>=0.8): directly usable for answering\n\
             - Medium relevance (0.6-0.8): use as supplementary reference\n\
             - Low relevance (<0.6): use with caution\n\
             - Results are deduplicated across knowledge bases and sorted by relevance\n\
             - Use get_related_chunks to expand context if needed\n",
        );

        let references: Vec<Value> = output
            .results
            .iter()
            .map(|hit| serde_json::to_value(&hit.result).unwrap_or(Value::Null))
            .collect();

        ToolResult::ok(text).with_data(json!({
            "knowledge_base_ids": request.kb_ids,
            "results": formatted,
            "references": references,
            "count": output.results.len(),
            "kb_counts": output.kb_counts,
            "search_mode": output.search_mode,
            "total_before_filter": output.total_before_filter,
            "display_type": "search_results",
        }))
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> String {
        "knowledge_search".to_string()
    }

    fn description(&self) -> String {
        "Search within knowledge bases with flexible query modes. Supports \
         targeted and broad searches across multiple KBs concurrently.\n\n\
         Modes: provide a single `query` for simple hybrid search, or \
         `vector_queries` / `keyword_queries` for explicit control; at least \
         one query parameter is required. Omit `knowledge_base_ids` to search \
         all allowed KBs. Results are reranked to a unified 0-1 score range, \
         merged, deduplicated and sorted by relevance; hits below the \
         thresholds are filtered automatically. Use vector queries for \
         semantic searches and keyword queries for exact term matching."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "knowledge_base_ids": {
                    "type": "array",
                    "description": "Knowledge base IDs to search (optional, defaults to all allowed KBs)",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 10
                },
                "query": {
                    "type": "string",
                    "description": "Single search query for simple hybrid search"
                },
                "vector_queries": {
                    "type": "array",
                    "description": "Semantic queries for vector search (1-5)",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5
                },
                "keyword_queries": {
                    "type": "array",
                    "description": "Keyword queries for lexical search (1-5)",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 5
                },
                "top_k": {
                    "type": "integer",
                    "description": "Results per knowledge base per query (default: 5)",
                    "default": 5,
                    "minimum": 1,
                    "maximum": 20
                },
                "vector_threshold": {
                    "type": "number",
                    "description": "Minimum score for vector results (default: 0.6)",
                    "default": 0.6,
                    "minimum": 0.0,
                    "maximum": 1.0
                },
                "keyword_threshold": {
                    "type": "number",
                    "description": "Minimum score for keyword results (default: 0.5)",
                    "default": 0.5,
                    "minimum": 0.0,
                    "maximum": 1.0
                },
                "knowledge_ids": {
                    "type": "array",
                    "description": "Optional document IDs to restrict results to",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 50
                },
                "min_score": {
                    "type": "number",
                    "description": "Absolute minimum score (default: 0.3)",
                    "default": 0.3,
                    "minimum": 0.0,
                    "maximum": 1.0
                }
            },
            "required": []
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let mut kb_ids = Self::parse_string_array(&args["knowledge_base_ids"]);
        if kb_ids.is_empty() {
            kb_ids = self.allowed_kbs.clone();
        }
        if kb_ids.is_empty() {
            return ToolResult::err(
                "no knowledge bases specified and no allowed KBs configured",
            );
        }

        let knowledge_ids = {
            let ids = Self::parse_string_array(&args["knowledge_ids"]);
            if ids.is_empty() { None } else { Some(ids.into_iter().collect::<HashSet<_>>()) }
        };

        let request = HybridSearchRequest {
            kb_ids,
            query: args["query"].as_str().filter(|s| !s.is_empty()).map(|s| s.to_string()),
            vector_queries: Self::parse_string_array(&args["vector_queries"]),
            keyword_queries: Self::parse_string_array(&args["keyword_queries"]),
            top_k: args["top_k"].as_u64().unwrap_or(5).clamp(1, 20) as usize,
            vector_threshold: args["vector_threshold"].as_f64().unwrap_or(0.6),
            keyword_threshold: args["keyword_threshold"].as_f64().unwrap_or(0.5),
            min_score: args["min_score"].as_f64().unwrap_or(0.3),
            knowledge_ids,
        };

        debug!(
            target: "tools",
            tool = "knowledge_search",
            kbs = request.kb_ids.len(),
            vector = request.vector_queries.len(),
            keyword = request.keyword_queries.len(),
            "Executing knowledge search"
        );

        match self.searcher.search(request.clone()).await {
            Ok(output) => {
                info!(
                    target: "tools",
                    tool = "knowledge_search",
                    count = output.results.len(),
                    raw = output.total_before_filter,
                    "Search finished"
                );
                Self::format_output(&output, &request)
            }
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}
