// No-match-prefix filter.
//
// When a no-match prefix is configured, the model's answer is intercepted
// on a temporary bus: chunks are held back while the accumulated content is
// still a prefix of the canned "no answer" opening. The first divergence
// flushes the buffer to the original bus and passes everything through; a
// response that never diverges is replaced by a single fallback answer.
//
// Registered ahead of the completion-stream plugin so its interception
// wraps the model stream inside the same stage chain.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{ChatManage, Next, PipelineStage, Plugin, PluginError};
use crate::event::{Event, EventBus, EventData, EventKind};

pub struct PluginStreamFilter;

impl PluginStreamFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PluginStreamFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct FilterState {
    buffer: String,
    /// True once the content diverged from the no-match prefix and chunks
    /// flow through unfiltered.
    passed_through: bool,
}

#[async_trait]
impl Plugin for PluginStreamFilter {
    fn activation_stages(&self) -> Vec<PipelineStage> {
        vec![PipelineStage::ChatCompletionStream, PipelineStage::StreamFilter]
    }

    async fn on_event(
        &self,
        stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> Result<(), PluginError> {
        // The dedicated StreamFilter stage is a checkpoint only; the
        // interception itself wraps the completion stream below.
        if stage == PipelineStage::StreamFilter {
            return next.run(chat).await;
        }

        let no_match_prefix = chat.summary_config.no_match_prefix.clone();
        if no_match_prefix.is_empty() {
            return next.run(chat).await;
        }
        let Some(original_bus) = chat.event_bus.clone() else {
            return next.run(chat).await;
        };

        info!(
            target: "pipeline",
            prefix = %no_match_prefix,
            "Stream filter armed with no-match prefix"
        );

        let state = Arc::new(Mutex::new(FilterState::default()));
        let temp_bus = Arc::new(EventBus::new());

        // Answer chunks: hold while still a candidate prefix, flush on
        // divergence, forward afterwards.
        {
            let state = Arc::clone(&state);
            let original = Arc::clone(&original_bus);
            let prefix = no_match_prefix.clone();
            temp_bus
                .on(EventKind::AgentFinalAnswer, move |event| {
                    let state = Arc::clone(&state);
                    let original = Arc::clone(&original);
                    let prefix = prefix.clone();
                    async move {
                        let EventData::AgentFinalAnswer { content, done } = &event.data else {
                            return Ok(());
                        };
                        let mut guard = state.lock().await;
                        if guard.passed_through {
                            drop(guard);
                            original.emit(event).await;
                            return Ok(());
                        }

                        guard.buffer.push_str(content);
                        if prefix.starts_with(guard.buffer.as_str()) {
                            // Still indistinguishable from the canned
                            // opening; keep holding.
                            return Ok(());
                        }

                        guard.passed_through = true;
                        let flushed = std::mem::take(&mut guard.buffer);
                        drop(guard);
                        original
                            .emit(Event {
                                id: event.id.clone(),
                                session_id: event.session_id.clone(),
                                request_id: event.request_id.clone(),
                                data: EventData::AgentFinalAnswer {
                                    content: flushed,
                                    done: *done,
                                },
                            })
                            .await;
                        Ok(())
                    }
                })
                .await;
        }

        // Completion: swap in the fallback when the whole answer matched
        // the no-match prefix.
        {
            let state = Arc::clone(&state);
            let original = Arc::clone(&original_bus);
            let fallback = chat.fallback_response.clone();
            temp_bus
                .on(EventKind::AgentComplete, move |event| {
                    let state = Arc::clone(&state);
                    let original = Arc::clone(&original);
                    let fallback = fallback.clone();
                    async move {
                        let EventData::AgentComplete {
                            session_id,
                            message_id,
                            knowledge_refs,
                            agent_steps,
                            final_answer,
                        } = &event.data
                        else {
                            return Ok(());
                        };

                        let suppressed = !state.lock().await.passed_through;
                        let final_answer = if suppressed {
                            info!(
                                target: "pipeline",
                                session_id = %session_id,
                                "Answer matched no-match prefix, emitting fallback"
                            );
                            original
                                .emit(
                                    Event::new(
                                        format!(
                                            "{}-fallback",
                                            &Uuid::new_v4().to_string()[..8]
                                        ),
                                        session_id.clone(),
                                        EventData::AgentFinalAnswer {
                                            content: fallback.clone(),
                                            done: true,
                                        },
                                    )
                                    .with_request_id(event.request_id.clone()),
                                )
                                .await;
                            fallback
                        } else {
                            final_answer.clone()
                        };

                        original
                            .emit(Event {
                                id: event.id.clone(),
                                session_id: event.session_id.clone(),
                                request_id: event.request_id.clone(),
                                data: EventData::AgentComplete {
                                    session_id: session_id.clone(),
                                    message_id: message_id.clone(),
                                    final_answer,
                                    knowledge_refs: knowledge_refs.clone(),
                                    agent_steps: agent_steps.clone(),
                                },
                            })
                            .await;
                        Ok(())
                    }
                })
                .await;
        }

        chat.event_bus = Some(temp_bus);
        let outcome = next.run(chat).await;
        chat.event_bus = Some(original_bus);
        outcome
    }
}
