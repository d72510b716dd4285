// Streaming answer stage: drives the chat model and emits incremental
// final-answer events on the request bus, then the completion event.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError, PluginErrorKind};
use crate::event::{Event, EventData};
use crate::llm::{ChatModel, ChatOptions, ModelProvider};

pub struct PluginChatCompletionStream {
    models: Arc<dyn ModelProvider>,
}

impl PluginChatCompletionStream {
    pub fn new(models: Arc<dyn ModelProvider>) -> Self {
        Self { models }
    }
}

#[async_trait]
impl Plugin for PluginChatCompletionStream {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::ChatCompletionStream]
    }

    async fn on_event(
        &self,
        _stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        let model = self
            .models
            .chat_model(&chat.chat_model_id)
            .await
            .map_err(|e| {
                PluginError::new(PluginErrorKind::GetChatModel, "failed to get chat model")
                    .with_cause(e)
            })?;

        let Some(bus) = chat.event_bus.clone() else {
            return Err(PluginError::new(
                PluginErrorKind::ModelCall,
                "event bus is required for streaming",
            ));
        };

        let opts = ChatOptions {
            temperature: Some(chat.summary_config.temperature),
            max_tokens: Some(chat.summary_config.max_tokens).filter(|t| *t > 0),
            top_p: Some(chat.summary_config.top_p).filter(|p| *p > 0.0),
            frequency_penalty: Some(chat.summary_config.frequency_penalty),
            presence_penalty: Some(chat.summary_config.presence_penalty),
            seed: chat.summary_config.seed,
            thinking: None,
        };

        debug!(
            target: "pipeline",
            model = %model.model_name(),
            messages = chat.chat_messages.len(),
            "Starting chat completion stream"
        );

        let mut rx = model.chat_stream(&chat.chat_messages, &[], &opts).await.map_err(|e| {
            PluginError::new(PluginErrorKind::ModelCall, "chat stream failed").with_cause(e)
        })?;

        // One stable id for the whole streamed answer, so the stream store
        // coalesces all chunks into a single logical event.
        let answer_id = format!("{}-answer", &Uuid::new_v4().to_string()[..8]);
        let mut final_content = String::new();
        let cancel = chat.cancel.clone();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    // Stopped by the user: no further answer or completion
                    // events; the session layer records the sentinel.
                    return Ok(());
                }
                chunk = rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };
            if !chunk.content.is_empty() {
                final_content.push_str(&chunk.content);
                bus.emit(
                    Event::new(
                        answer_id.clone(),
                        chat.session_id.clone(),
                        EventData::AgentFinalAnswer { content: chunk.content, done: false },
                    )
                    .with_request_id(chat.request_id.clone()),
                )
                .await;
            }
            if chunk.done {
                break;
            }
        }

        bus.emit(
            Event::new(
                answer_id.clone(),
                chat.session_id.clone(),
                EventData::AgentFinalAnswer { content: String::new(), done: true },
            )
            .with_request_id(chat.request_id.clone()),
        )
        .await;

        info!(
            target: "pipeline",
            session_id = %chat.session_id,
            chars = final_content.len(),
            "Chat stream completed, emitting completion event"
        );

        bus.emit(
            Event::new(
                format!("{}-complete", &Uuid::new_v4().to_string()[..8]),
                chat.session_id.clone(),
                EventData::AgentComplete {
                    session_id: chat.session_id.clone(),
                    message_id: chat.message_id.clone(),
                    final_answer: final_content,
                    knowledge_refs: chat.merge_result.clone(),
                    agent_steps: Vec::new(),
                },
            )
            .with_request_id(chat.request_id.clone()),
        )
        .await;

        next.run(chat).await
    }
}
