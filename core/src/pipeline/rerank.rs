// Second-pass scoring of the search results.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError};
use crate::llm::{ModelProvider, Reranker};

pub struct PluginRerank {
    models: Arc<dyn ModelProvider>,
}

impl PluginRerank {
    pub fn new(models: Arc<dyn ModelProvider>) -> Self {
        Self { models }
    }
}

#[async_trait]
impl Plugin for PluginRerank {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::ChunkRerank]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        if chat.search_result.is_empty() || chat.rerank_model_id.is_empty() {
            chat.rerank_result = chat.search_result.clone();
            return next.run(chat).await;
        }

        let reranker = match self.models.reranker(&chat.rerank_model_id).await {
            Ok(r) => r,
            Err(e) => {
                // Rerank failure keeps original scores.
                warn!(target: "pipeline", error = %e, "Rerank model unavailable, keeping original scores");
                chat.rerank_result = chat.search_result.clone();
                return next.run(chat).await;
            }
        };

        let passages: Vec<String> =
            chat.search_result.iter().map(|r| r.content.clone()).collect();

        match reranker.rerank(&chat.rewrite_query, &passages).await {
            Ok(scores) => {
                let mut reranked = Vec::with_capacity(scores.len());
                for score in scores {
                    if let Some(hit) = chat.search_result.get(score.index) {
                        let mut hit = hit.clone();
                        hit.score = score.relevance_score;
                        reranked.push(hit);
                    }
                }
                info!(
                    target: "pipeline",
                    model = %reranker.model_name(),
                    count = reranked.len(),
                    "Search results reranked"
                );
                chat.rerank_result = reranked;
            }
            Err(e) => {
                warn!(target: "pipeline", error = %e, "Rerank failed, keeping original scores");
                chat.rerank_result = chat.search_result.clone();
            }
        }

        next.run(chat).await
    }
}
