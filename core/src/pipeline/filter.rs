// Final cut: rerank-threshold filter plus the top-K limit.
use async_trait::async_trait;
use tracing::debug;

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError};

pub struct PluginFilterTopK;

impl PluginFilterTopK {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PluginFilterTopK {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PluginFilterTopK {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::FilterTopK]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        let before = chat.merge_result.len();

        if chat.rerank_threshold > 0.0 {
            chat.merge_result.retain(|r| r.score >= chat.rerank_threshold);
        }
        if chat.rerank_top_k > 0 && chat.merge_result.len() > chat.rerank_top_k {
            chat.merge_result.truncate(chat.rerank_top_k);
        }

        debug!(
            target: "pipeline",
            before,
            after = chat.merge_result.len(),
            threshold = chat.rerank_threshold,
            top_k = chat.rerank_top_k,
            "Top-K filter applied"
        );

        if chat.merge_result.is_empty() {
            return Err(PluginError::search_nothing());
        }
        next.run(chat).await
    }
}
