// Context-expansion tool: resolve chunks related to reference chunks,
// either adjacent in the document or semantically similar.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::debug;

use super::traits::{Tool, ToolContext};
use crate::search::{HybridSearchRequest, HybridSearcher};
use crate::storage::ChunkStore;
use crate::types::{Chunk, MatchType, SearchResult, ToolResult};

pub struct GetRelatedChunksTool {
    chunk_store: Arc<dyn ChunkStore>,
    searcher: Arc<HybridSearcher>,
}

struct RelatedChunk {
    chunk: Chunk,
    score: Option<f64>,
}

impl GetRelatedChunksTool {
    pub fn new(chunk_store: Arc<dyn ChunkStore>, searcher: Arc<HybridSearcher>) -> Self {
        Self { chunk_store, searcher }
    }

    /// Adjacent chunks in the same document: indices within
    /// `[idx - limit/2, idx + limit/2]`, source excluded.
    async fn sequential_related(
        chunk_store: &dyn ChunkStore,
        chunk: &Chunk,
        limit: usize,
    ) -> crate::Result<Vec<RelatedChunk>> {
        let all = chunk_store.list_chunks_by_knowledge_id(&chunk.knowledge_id).await?;
        let half = (limit / 2).max(1) as i32;
        let min_index = chunk.chunk_index - half;
        let max_index = chunk.chunk_index + half;

        Ok(all
            .into_iter()
            .filter(|c| {
                c.chunk_index >= min_index && c.chunk_index <= max_index && c.id != chunk.id
            })
            .map(|chunk| RelatedChunk { chunk, score: None })
            .collect())
    }

    /// Semantically similar chunks anywhere in the chunk's knowledge base,
    /// found by searching with the chunk's own content.
    async fn semantic_related(
        searcher: &HybridSearcher,
        chunk: &Chunk,
        limit: usize,
    ) -> crate::Result<Vec<RelatedChunk>> {
        let request = HybridSearchRequest {
            kb_ids: vec![chunk.knowledge_base_id.clone()],
            query: Some(chunk.content.clone()),
            top_k: limit + 5, // extra headroom for source-chunk filtering
            ..Default::default()
        };
        let output = searcher.search(request).await?;

        Ok(output
            .results
            .into_iter()
            .filter(|hit| hit.result.id != chunk.id)
            .take(limit)
            .map(|hit| RelatedChunk {
                chunk: Chunk {
                    id: hit.result.id.clone(),
                    knowledge_id: hit.result.knowledge_id.clone(),
                    knowledge_base_id: chunk.knowledge_base_id.clone(),
                    content: hit.result.content.clone(),
                    chunk_index: hit.result.chunk_index,
                },
                score: Some(hit.result.score),
            })
            .collect())
    }

    fn to_reference(related: &RelatedChunk) -> SearchResult {
        SearchResult {
            id: related.chunk.id.clone(),
            content: related.chunk.content.clone(),
            knowledge_id: related.chunk.knowledge_id.clone(),
            knowledge_base_id: related.chunk.knowledge_base_id.clone(),
            knowledge_title: String::new(),
            chunk_index: related.chunk.chunk_index,
            score: related.score.unwrap_or(0.6),
            match_type: MatchType::Embedding,
            metadata: Default::default(),
        }
    }
}

#[async_trait]
impl Tool for GetRelatedChunksTool {
    fn name(&self) -> String {
        "get_related_chunks".to_string()
    }

    fn description(&self) -> String {
        "Retrieve chunks related to specified reference chunks. Supports \
         sequential (adjacent) and semantic (similar) relation types.\n\n\
         Use when search results need surrounding context, or to discover \
         related discussions across a document. Sequential retrieves adjacent \
         chunks in document order (ideal for continuous reading); semantic \
         finds content-similar chunks regardless of position (ideal for topic \
         expansion). Results are deduplicated, source chunks are excluded, \
         sequential results are sorted by position and semantic results by \
         similarity."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "chunk_ids": {
                    "type": "array",
                    "description": "Reference chunk IDs from earlier search results",
                    "items": {"type": "string"},
                    "minItems": 1,
                    "maxItems": 10
                },
                "relation_type": {
                    "type": "string",
                    "description": "Type: sequential (default) or semantic",
                    "enum": ["sequential", "semantic"],
                    "default": "sequential"
                },
                "limit": {
                    "type": "integer",
                    "description": "Related chunks per reference chunk (default: 5)",
                    "default": 5,
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["chunk_ids"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolResult {
        let chunk_ids: Vec<String> = args["chunk_ids"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        if chunk_ids.is_empty() {
            return ToolResult::err("chunk_ids is required and must be a non-empty array");
        }

        let relation_type = args["relation_type"].as_str().unwrap_or("sequential").to_string();
        let limit = args["limit"].as_u64().unwrap_or(5).clamp(1, 10) as usize;

        debug!(
            target: "tools",
            tool = "get_related_chunks",
            chunks = chunk_ids.len(),
            relation = %relation_type,
            "Resolving related chunks"
        );

        // Resolve every reference chunk concurrently.
        let mut join_set: JoinSet<(String, crate::Result<Vec<RelatedChunk>>)> = JoinSet::new();
        for chunk_id in &chunk_ids {
            let chunk_store = Arc::clone(&self.chunk_store);
            let searcher = Arc::clone(&self.searcher);
            let relation = relation_type.clone();
            let id = chunk_id.clone();
            join_set.spawn(async move {
                let related = async {
                    let chunk = chunk_store
                        .get_chunk_by_id(&id)
                        .await?
                        .ok_or_else(|| crate::WeKnoraError::NotFound(format!("chunk {id}")))?;
                    if relation == "semantic" {
                        Self::semantic_related(&searcher, &chunk, limit).await
                    } else {
                        Self::sequential_related(chunk_store.as_ref(), &chunk, limit).await
                    }
                }
                .await;
                (id, related)
            });
        }

        let source_ids: HashSet<&String> = chunk_ids.iter().collect();
        let mut seen: HashMap<String, RelatedChunk> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            let Ok((chunk_id, outcome)) = joined else { continue };
            match outcome {
                Ok(related) => {
                    for r in related {
                        if source_ids.contains(&r.chunk.id) || seen.contains_key(&r.chunk.id) {
                            continue;
                        }
                        order.push(r.chunk.id.clone());
                        seen.insert(r.chunk.id.clone(), r);
                    }
                }
                Err(e) => errors.push(format!("chunk {chunk_id}: {e}")),
            }
        }

        let mut related: Vec<RelatedChunk> = order
            .iter()
            .filter_map(|id| seen.remove(id))
            .collect();

        if relation_type == "sequential" {
            related.sort_by(|a, b| {
                a.chunk
                    .knowledge_id
                    .cmp(&b.chunk.knowledge_id)
                    .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
            });
        } else {
            related.sort_by(|a, b| {
                b.score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if related.is_empty() {
            return ToolResult::ok(
                "No related chunks found. Possible reasons:\n\
                 - Chunk is the only chunk in its document\n\
                 - Semantic similarity threshold not met\n\
                 - Invalid chunk_id provided",
            )
            .with_data(json!({
                "chunk_ids": chunk_ids,
                "relation_type": relation_type,
                "count": 0,
                "chunks": [],
                "references": [],
                "errors": errors,
            }));
        }

        let mut text = String::from("=== Related Chunks ===\n\n");
        text.push_str(&format!("Reference chunks: {}\n", chunk_ids.len()));
        text.push_str(&format!("Relation type: {relation_type}\n"));
        text.push_str(&format!("Found {} related chunks (deduplicated)\n\n", related.len()));
        if !errors.is_empty() {
            text.push_str("=== Partial Failures ===\n");
            for err in &errors {
                text.push_str(&format!("  - {err}\n"));
            }
            text.push('\n');
        }
        text.push_str("=== Content ===\n\n");

        let mut formatted = Vec::with_capacity(related.len());
        for (i, r) in related.iter().enumerate() {
            text.push_str(&format!(
                "Chunk #{} (position {}):\n  chunk_id: {}\n  content: {}\n\n",
                i + 1,
                r.chunk.chunk_index + 1,
                r.chunk.id,
                r.chunk.content
            ));
            formatted.push(json!({
                "index": i + 1,
                "chunk_id": r.chunk.id,
                "chunk_index": r.chunk.chunk_index,
                "content": r.chunk.content,
                "knowledge_id": r.chunk.knowledge_id,
                "score": r.score,
            }));
        }

        let references: Vec<Value> = related
            .iter()
            .map(|r| serde_json::to_value(Self::to_reference(r)).unwrap_or(Value::Null))
            .collect();

        ToolResult::ok(text).with_data(json!({
            "chunk_ids": chunk_ids,
            "relation_type": relation_type,
            "count": related.len(),
            "chunks": formatted,
            "references": references,
            "errors": errors,
            "display_type": "related_chunks",
        }))
    }
}
