// Query preprocessing: history-aware rewrite plus normalization.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{ChatManage, Next, PipelineStage, Plugin};
use crate::llm::{ChatModel, ChatOptions, ModelProvider};
use crate::types::{ChatMessage, Role};

pub struct PluginPreprocess {
    models: Arc<dyn ModelProvider>,
    enable_rewrite: bool,
}

impl PluginPreprocess {
    pub fn new(models: Arc<dyn ModelProvider>, enable_rewrite: bool) -> Self {
        Self { models, enable_rewrite }
    }

    /// Resolve pronouns and ellipsis against the conversation so retrieval
    /// sees a self-contained query.
    async fn rewrite(&self, chat: &ChatManage) -> crate::Result<String> {
        let model = self.models.chat_model(&chat.chat_model_id).await?;

        let mut conversation = String::new();
        for msg in chat.history.iter().rev().take(6).collect::<Vec<_>>().into_iter().rev() {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => continue,
            };
            conversation.push_str(&format!("{role}: {}\n", msg.content));
        }

        let messages = vec![
            ChatMessage::system(
                "Rewrite the user's latest question into a fully self-contained search \
                 query, resolving pronouns and references against the conversation. \
                 Reply with the rewritten query only.",
            ),
            ChatMessage::user(format!(
                "Conversation:\n{conversation}\nLatest question: {}",
                chat.query
            )),
        ];

        let opts = ChatOptions { temperature: Some(0.1), ..Default::default() };
        let response = model.chat(&messages, &opts).await?;
        Ok(response.content.trim().to_string())
    }
}

#[async_trait]
impl Plugin for PluginPreprocess {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::PreprocessQuery]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), super::PluginError> {
        chat.processed_query = chat.query.trim().to_string();

        if chat.rewrite_query.is_empty() {
            chat.rewrite_query = chat.processed_query.clone();
        }

        if self.enable_rewrite && !chat.history.is_empty() {
            match self.rewrite(chat).await {
                Ok(rewritten) if !rewritten.is_empty() => {
                    info!(
                        target: "pipeline",
                        original = %chat.query,
                        rewritten = %rewritten,
                        "Query rewritten"
                    );
                    chat.rewrite_query = rewritten;
                }
                Ok(_) => {}
                Err(e) => {
                    // The original query is always a workable fallback.
                    warn!(target: "pipeline", error = %e, "Query rewrite failed, using original");
                }
            }
        }

        next.run(chat).await
    }
}
