// Merge stage: deduplicate by chunk id keeping the best score, then order
// by relevance.
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError};
use crate::types::SearchResult;

pub struct PluginMerge;

impl PluginMerge {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PluginMerge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PluginMerge {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::ChunkMerge]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        let mut best: HashMap<String, SearchResult> = HashMap::new();
        for result in chat.rerank_result.drain(..) {
            match best.get(&result.id) {
                Some(existing) if existing.score >= result.score => {}
                _ => {
                    best.insert(result.id.clone(), result);
                }
            }
        }

        let mut merged: Vec<SearchResult> = best.into_values().collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.knowledge_id.cmp(&b.knowledge_id))
        });

        debug!(target: "pipeline", count = merged.len(), "Results merged");
        chat.merge_result = merged;
        next.run(chat).await
    }
}
