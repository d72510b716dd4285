//! Hybrid Search Core
//!
//! Parallel multi-KB, multi-query retrieval with threshold filtering,
//! rerank fusion, deduplication and stable ordering. The vector/keyword
//! index backends stay external behind [`RetrievalBackend`].

mod hybrid;

pub use hybrid::{HybridSearchOutput, HybridSearcher, RankedResult};

use std::collections::HashSet;

use async_trait::async_trait;

use crate::types::{SearchParams, SearchResult};
use crate::Result;

/// External retrieval contract: one call per `(knowledge base, query)`.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    async fn hybrid_search(&self, kb_id: &str, params: SearchParams) -> Result<Vec<SearchResult>>;
}

/// Which side of the hybrid fan-out produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Vector,
    Keyword,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Vector => "vector",
            QueryType::Keyword => "keyword",
        }
    }
}

/// One hybrid search invocation.
#[derive(Debug, Clone)]
pub struct HybridSearchRequest {
    pub kb_ids: Vec<String>,
    /// Shorthand: expanded to both a vector and a keyword query when the
    /// explicit lists are empty.
    pub query: Option<String>,
    pub vector_queries: Vec<String>,
    pub keyword_queries: Vec<String>,
    pub top_k: usize,
    pub vector_threshold: f64,
    pub keyword_threshold: f64,
    pub min_score: f64,
    /// Optional document filter: hits outside this set are dropped.
    pub knowledge_ids: Option<HashSet<String>>,
}

impl Default for HybridSearchRequest {
    fn default() -> Self {
        Self {
            kb_ids: Vec::new(),
            query: None,
            vector_queries: Vec::new(),
            keyword_queries: Vec::new(),
            top_k: 5,
            vector_threshold: 0.6,
            keyword_threshold: 0.5,
            min_score: 0.3,
            knowledge_ids: None,
        }
    }
}
