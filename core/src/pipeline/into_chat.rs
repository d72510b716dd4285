// Message assembly: fold the retrieved context and history into the chat
// messages handed to the model.
use async_trait::async_trait;
use tracing::debug;

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError};
use crate::types::{ChatMessage, Role};

const DEFAULT_PROMPT: &str =
    "You are a helpful assistant. Answer the question using only the provided \
     context. If the context does not contain the answer, say you do not know.";

const DEFAULT_CONTEXT_TEMPLATE: &str = "Context:\n{context}\n\nQuestion: {query}";

pub struct PluginIntoChatMessage;

impl PluginIntoChatMessage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PluginIntoChatMessage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for PluginIntoChatMessage {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::IntoChatMessage]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        let prompt = if chat.summary_config.prompt.is_empty() {
            DEFAULT_PROMPT
        } else {
            &chat.summary_config.prompt
        };
        let template = if chat.summary_config.context_template.is_empty() {
            DEFAULT_CONTEXT_TEMPLATE
        } else {
            &chat.summary_config.context_template
        };

        let mut context = String::new();
        for (i, result) in chat.merge_result.iter().enumerate() {
            context.push_str(&format!("[{}] {}\n\n", i + 1, result.content));
        }

        let user_content = template
            .replace("{context}", context.trim_end())
            .replace("{query}", &chat.query);

        let mut messages = vec![ChatMessage::system(prompt)];
        for message in &chat.history {
            match message.role {
                Role::User => messages.push(ChatMessage::user(message.content.clone())),
                Role::Assistant => {
                    if message.is_completed && !message.content.is_empty() {
                        messages.push(ChatMessage::assistant(message.content.clone()));
                    }
                }
                Role::System => {}
            }
        }
        messages.push(ChatMessage::user(user_content));

        debug!(
            target: "pipeline",
            messages = messages.len(),
            context_chunks = chat.merge_result.len(),
            "Chat messages assembled"
        );
        chat.chat_messages = messages;
        next.run(chat).await
    }
}
