// Retrieval stage: parallel KB fan-out, history-carried references and
// optional web search compressed through a session-scoped temp KB.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError};
use crate::providers::{
    convert_web_results, temp_kb_key, KvStore, TempKbState, WebSearchProvider,
};
use crate::search::RetrievalBackend;
use crate::types::{MatchType, SearchParams, SearchResult};

pub struct PluginSearch {
    backend: Arc<dyn RetrievalBackend>,
    web_search: Option<Arc<dyn WebSearchProvider>>,
    kv: Arc<dyn KvStore>,
}

impl PluginSearch {
    pub fn new(
        backend: Arc<dyn RetrievalBackend>,
        web_search: Option<Arc<dyn WebSearchProvider>>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self { backend, web_search, kv }
    }

    /// Search every KB with the rewrite query, and again with the processed
    /// query when it differs. Per-KB failures are logged and skipped.
    async fn search_knowledge_bases(&self, chat: &ChatManage) -> Vec<SearchResult> {
        let mut queries = vec![chat.rewrite_query.trim().to_string()];
        let processed = chat.processed_query.trim();
        if !processed.is_empty() && processed != chat.rewrite_query.trim() {
            queries.push(processed.to_string());
        }

        let mut join_set: JoinSet<Option<Vec<SearchResult>>> = JoinSet::new();
        for query in &queries {
            for kb_id in &chat.knowledge_base_ids {
                let backend = Arc::clone(&self.backend);
                let kb_id = kb_id.clone();
                let params = SearchParams {
                    query_text: query.clone(),
                    match_count: chat.embedding_top_k,
                    vector_threshold: chat.vector_threshold,
                    keyword_threshold: chat.keyword_threshold,
                };
                join_set.spawn(async move {
                    match backend.hybrid_search(&kb_id, params).await {
                        Ok(hits) => Some(hits),
                        Err(e) => {
                            warn!(
                                target: "pipeline",
                                kb_id = %kb_id,
                                error = %e,
                                "KB search failed, skipping"
                            );
                            None
                        }
                    }
                });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok(Some(hits)) = joined {
                results.extend(hits);
            }
        }
        results
    }

    /// References from the most recent prior assistant message that carried
    /// any, tagged as history matches.
    fn history_references(chat: &ChatManage) -> Vec<SearchResult> {
        for message in chat.history.iter().rev() {
            if !message.knowledge_references.is_empty() {
                return message
                    .knowledge_references
                    .iter()
                    .cloned()
                    .map(|mut r| {
                        r.match_type = MatchType::History;
                        r
                    })
                    .collect();
            }
        }
        Vec::new()
    }

    async fn search_web(&self, chat: &ChatManage) -> Vec<SearchResult> {
        let Some(provider) = &self.web_search else {
            return Vec::new();
        };
        if !chat.web_search_enabled {
            return Vec::new();
        }

        let web_results = match provider.search(&chat.rewrite_query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(target: "pipeline", error = %e, "Web search failed");
                return Vec::new();
            }
        };
        if web_results.is_empty() {
            return Vec::new();
        }

        let mut questions = vec![chat.rewrite_query.trim().to_string()];
        let processed = chat.processed_query.trim();
        if !processed.is_empty() && processed != chat.rewrite_query.trim() {
            questions.push(processed.to_string());
        }

        // Session-scoped temp-KB state lives in the external KV store.
        let state_key = temp_kb_key(&chat.session_id);
        let state: TempKbState = match self.kv.get(&state_key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => TempKbState::default(),
        };

        match provider
            .compress_with_rag(&chat.session_id, state, &questions, web_results.clone())
            .await
        {
            Ok((compressed, new_state)) => {
                if let Ok(raw) = serde_json::to_string(&new_state) {
                    if let Err(e) = self.kv.set(&state_key, &raw).await {
                        warn!(target: "pipeline", error = %e, "Failed to persist temp KB state");
                    }
                }
                convert_web_results(&compressed)
            }
            Err(e) => {
                warn!(
                    target: "pipeline",
                    error = %e,
                    "RAG compression failed, falling back to raw web results"
                );
                convert_web_results(&web_results)
            }
        }
    }
}

fn remove_duplicates(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results.into_iter().filter(|r| seen.insert(r.id.clone())).collect()
}

#[async_trait]
impl Plugin for PluginSearch {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::ChunkSearch]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        if chat.knowledge_base_ids.is_empty() {
            return Err(PluginError::new(
                super::PluginErrorKind::Search,
                "no knowledge base ids available for search",
            ));
        }

        // KB retrieval and web search run concurrently.
        let (kb_results, web_results) =
            tokio::join!(self.search_knowledge_bases(chat), self.search_web(chat));

        let mut all = kb_results;
        all.extend(web_results);
        all.extend(Self::history_references(chat));

        chat.search_result = remove_duplicates(all);

        if chat.search_result.is_empty() {
            info!(
                target: "pipeline",
                session_id = %chat.session_id,
                "No search results from any source"
            );
            return Err(PluginError::search_nothing());
        }

        info!(
            target: "pipeline",
            session_id = %chat.session_id,
            count = chat.search_result.len(),
            "Search results collected"
        );
        next.run(chat).await
    }
}
