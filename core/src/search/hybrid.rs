// Concurrent hybrid-search fan-out with rerank fusion.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{HybridSearchRequest, QueryType, RetrievalBackend};
use crate::llm::Reranker;
use crate::types::{MatchType, SearchParams, SearchResult};
use crate::{Result, WeKnoraError};

/// A hit tagged with the query that produced it.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub result: SearchResult,
    pub source_query: String,
    pub query_type: QueryType,
}

/// Ranked, deduplicated output plus fan-out metadata.
#[derive(Debug, Clone)]
pub struct HybridSearchOutput {
    pub results: Vec<RankedResult>,
    pub total_before_filter: usize,
    /// Result counts per knowledge base.
    pub kb_counts: HashMap<String, usize>,
    pub search_mode: &'static str,
}

/// Orchestrates the `{vector | keyword} × queries × kbIDs` cross product.
pub struct HybridSearcher {
    backend: Arc<dyn RetrievalBackend>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl HybridSearcher {
    pub fn new(backend: Arc<dyn RetrievalBackend>, reranker: Option<Arc<dyn Reranker>>) -> Self {
        Self { backend, reranker }
    }

    pub async fn search(&self, mut request: HybridSearchRequest) -> Result<HybridSearchOutput> {
        // Shorthand query expands to both modes when the explicit lists are
        // empty.
        if let Some(q) = request.query.as_deref() {
            if !q.is_empty()
                && request.vector_queries.is_empty()
                && request.keyword_queries.is_empty()
            {
                request.vector_queries = vec![q.to_string()];
                request.keyword_queries = vec![q.to_string()];
            }
        }

        if request.vector_queries.is_empty() && request.keyword_queries.is_empty() {
            return Err(WeKnoraError::InvalidArgument(
                "at least one of query, vector_queries, or keyword_queries must be provided"
                    .to_string(),
            ));
        }
        if request.kb_ids.is_empty() {
            return Err(WeKnoraError::InvalidArgument(
                "at least one knowledge base id is required".to_string(),
            ));
        }

        let search_mode = match (
            request.vector_queries.is_empty(),
            request.keyword_queries.is_empty(),
        ) {
            (false, true) => "vector",
            (true, false) => "keyword",
            _ => "hybrid",
        };

        let raw = self.fan_out(&request).await;
        let total_before_filter = raw.len();
        debug!(
            target: "hybrid_search",
            raw = total_before_filter,
            mode = search_mode,
            "Fan-out complete"
        );

        let mut filtered = filter_by_threshold(
            raw,
            request.vector_threshold,
            request.keyword_threshold,
        );

        if let Some(ids) = &request.knowledge_ids {
            filtered.retain(|r| ids.contains(&r.result.knowledge_id));
        }

        if let Some(reranker) = &self.reranker {
            if !filtered.is_empty() {
                if let Some(rerank_query) = pick_rerank_query(&request) {
                    match self.rerank(reranker.as_ref(), &rerank_query, filtered.clone()).await {
                        Ok(reranked) => filtered = reranked,
                        Err(e) => {
                            warn!(
                                target: "hybrid_search",
                                error = %e,
                                "Rerank failed, keeping original scores"
                            );
                        }
                    }
                }
            }
        }

        filtered.retain(|r| r.result.score >= request.min_score);

        let deduped = deduplicate(filtered);
        let results = sort_results(deduped);

        let mut kb_counts: HashMap<String, usize> = HashMap::new();
        for r in &results {
            *kb_counts.entry(r.result.knowledge_base_id.clone()).or_default() += 1;
        }

        info!(
            target: "hybrid_search",
            kb_count = request.kb_ids.len(),
            raw = total_before_filter,
            returned = results.len(),
            mode = search_mode,
            "Hybrid search finished"
        );

        Ok(HybridSearchOutput { results, total_before_filter, kb_counts, search_mode })
    }

    /// Launch the full cross product in parallel; a failing triple is
    /// logged and skipped (partial success).
    async fn fan_out(&self, request: &HybridSearchRequest) -> Vec<RankedResult> {
        let mut join_set: JoinSet<Option<Vec<RankedResult>>> = JoinSet::new();

        let sides: [(QueryType, &Vec<String>); 2] = [
            (QueryType::Vector, &request.vector_queries),
            (QueryType::Keyword, &request.keyword_queries),
        ];

        for (query_type, queries) in sides {
            for query in queries {
                for kb_id in &request.kb_ids {
                    let backend = Arc::clone(&self.backend);
                    let kb_id = kb_id.clone();
                    let query = query.clone();
                    // Only the matching threshold is active per side; the
                    // other is pinned to 1.0 so the backend cannot leak
                    // low-score hits of the wrong mode.
                    let params = match query_type {
                        QueryType::Vector => SearchParams {
                            query_text: query.clone(),
                            match_count: request.top_k,
                            vector_threshold: request.vector_threshold,
                            keyword_threshold: 1.0,
                        },
                        QueryType::Keyword => SearchParams {
                            query_text: query.clone(),
                            match_count: request.top_k,
                            vector_threshold: 1.0,
                            keyword_threshold: request.keyword_threshold,
                        },
                    };
                    join_set.spawn(async move {
                        match backend.hybrid_search(&kb_id, params).await {
                            Ok(hits) => Some(
                                hits.into_iter()
                                    .map(|result| RankedResult {
                                        result,
                                        source_query: query.clone(),
                                        query_type,
                                    })
                                    .collect(),
                            ),
                            Err(e) => {
                                warn!(
                                    target: "hybrid_search",
                                    kb_id = %kb_id,
                                    query = %query,
                                    error = %e,
                                    "KB search failed, skipping"
                                );
                                None
                            }
                        }
                    });
                }
            }
        }

        let mut all = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(hits)) => all.extend(hits),
                Ok(None) => {}
                Err(e) => warn!(target: "hybrid_search", error = %e, "Search task panicked"),
            }
        }
        all
    }

    async fn rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        results: Vec<RankedResult>,
    ) -> Result<Vec<RankedResult>> {
        let passages: Vec<String> =
            results.iter().map(|r| r.result.content.clone()).collect();
        let scores = reranker.rerank(query, &passages).await?;

        let mut reranked = Vec::with_capacity(scores.len());
        for score in scores {
            if let Some(hit) = results.get(score.index) {
                let mut hit = hit.clone();
                hit.result.score = score.relevance_score;
                reranked.push(hit);
            }
        }
        info!(
            target: "hybrid_search",
            model = %reranker.model_name(),
            reranked = reranked.len(),
            "Rerank applied"
        );
        Ok(reranked)
    }
}

fn filter_by_threshold(
    results: Vec<RankedResult>,
    vector_threshold: f64,
    keyword_threshold: f64,
) -> Vec<RankedResult> {
    let min_threshold = vector_threshold.min(keyword_threshold);
    results
        .into_iter()
        .filter(|r| match r.result.match_type {
            MatchType::Embedding => r.result.score >= vector_threshold,
            MatchType::Keyword => r.result.score >= keyword_threshold,
            // Graph, web and history hits pass on the looser of the two.
            _ => r.result.score >= min_threshold,
        })
        .collect()
}

fn pick_rerank_query(request: &HybridSearchRequest) -> Option<String> {
    request
        .query
        .clone()
        .filter(|q| !q.is_empty())
        .or_else(|| request.vector_queries.first().cloned())
        .or_else(|| request.keyword_queries.first().cloned())
}

/// Keep the highest-scoring hit per chunk id.
fn deduplicate(results: Vec<RankedResult>) -> Vec<RankedResult> {
    let mut seen: HashMap<String, RankedResult> = HashMap::new();
    for r in results {
        match seen.get(&r.result.id) {
            Some(existing) if existing.result.score >= r.result.score => {}
            _ => {
                seen.insert(r.result.id.clone(), r);
            }
        }
    }
    seen.into_values().collect()
}

/// Descending score; ties prefer vector hits, then ascending knowledge id.
fn sort_results(mut results: Vec<RankedResult>) -> Vec<RankedResult> {
    results.sort_by(|a, b| {
        b.result
            .score
            .partial_cmp(&a.result.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_vec = a.query_type == QueryType::Vector;
                let b_vec = b.query_type == QueryType::Vector;
                b_vec.cmp(&a_vec)
            })
            .then_with(|| a.result.knowledge_id.cmp(&b.result.knowledge_id))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64, match_type: MatchType) -> RankedResult {
        RankedResult {
            result: SearchResult {
                id: id.to_string(),
                content: format!("content {id}"),
                knowledge_id: format!("doc-{id}"),
                knowledge_base_id: "kb1".to_string(),
                knowledge_title: String::new(),
                chunk_index: 0,
                score,
                match_type,
                metadata: Default::default(),
            },
            source_query: "q".to_string(),
            query_type: match match_type {
                MatchType::Keyword => QueryType::Keyword,
                _ => QueryType::Vector,
            },
        }
    }

    #[test]
    fn threshold_rules_per_match_type() {
        let results = vec![
            hit("a", 0.65, MatchType::Embedding), // passes vector 0.6
            hit("b", 0.55, MatchType::Embedding), // fails vector
            hit("c", 0.55, MatchType::Keyword),   // passes keyword 0.5
            hit("d", 0.52, MatchType::Graph),     // passes min(0.6, 0.5)
            hit("e", 0.45, MatchType::Graph),     // fails min
        ];
        let filtered = filter_by_threshold(results, 0.6, 0.5);
        let ids: Vec<&str> = filtered.iter().map(|r| r.result.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }

    #[test]
    fn dedupe_keeps_max_score() {
        let results = vec![
            hit("a", 0.7, MatchType::Embedding),
            hit("a", 0.9, MatchType::Keyword),
            hit("a", 0.8, MatchType::Embedding),
        ];
        let deduped = deduplicate(results);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].result.score, 0.9);
    }

    #[test]
    fn sort_prefers_score_then_vector_then_knowledge_id() {
        let mut a = hit("a", 0.8, MatchType::Keyword);
        a.result.knowledge_id = "doc-b".to_string();
        let mut b = hit("b", 0.8, MatchType::Embedding);
        b.result.knowledge_id = "doc-c".to_string();
        let mut c = hit("c", 0.8, MatchType::Embedding);
        c.result.knowledge_id = "doc-a".to_string();
        let d = hit("d", 0.9, MatchType::Keyword);

        let sorted = sort_results(vec![a, b, c, d]);
        let ids: Vec<&str> = sorted.iter().map(|r| r.result.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn rerank_query_selection_order() {
        let mut request = HybridSearchRequest {
            query: Some("short".to_string()),
            vector_queries: vec!["v1".to_string()],
            keyword_queries: vec!["k1".to_string()],
            ..Default::default()
        };
        assert_eq!(pick_rerank_query(&request).unwrap(), "short");
        request.query = None;
        assert_eq!(pick_rerank_query(&request).unwrap(), "v1");
        request.vector_queries.clear();
        assert_eq!(pick_rerank_query(&request).unwrap(), "k1");
    }
}
