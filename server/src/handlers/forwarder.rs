// Bridges a request's event bus to the live SSE channel and the stream
// store.
//
// Every event is persisted before its SSE frame goes out: incremental
// kinds (thinking, answer, reflection) are accumulated per logical event
// id and written with `replace_event`, everything else is appended.
// Resuming clients therefore observe the same coalesced sequence a live
// client saw.
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use weknora_core::event::{EventBus, EventData, EventKind};
use weknora_core::storage::MessageStore;
use weknora_core::stream::StreamStore;
use weknora_core::types::{Message, ResponseType, StreamEvent, StreamFrame};

struct Shared {
    tx: mpsc::Sender<StreamFrame>,
    store: Arc<dyn StreamStore>,
    messages: Arc<dyn MessageStore>,
    session_id: String,
    message_id: String,
    request_id: String,
    accumulated: Mutex<HashMap<String, String>>,
    assistant: Mutex<Message>,
}

impl Shared {
    async fn send_frame(&self, frame: StreamFrame) {
        if self.tx.send(frame).await.is_err() {
            debug!(
                target: "sse",
                session_id = %self.session_id,
                "Live client gone, frame dropped"
            );
        }
    }

    fn frame(&self, response_type: ResponseType) -> StreamFrame {
        StreamFrame::new(self.request_id.clone(), response_type)
    }

    /// Accumulate a chunk under its logical event id and replace the stored
    /// event so refreshing clients see the latest partial content.
    async fn accumulate_and_replace(
        &self,
        event_id: &str,
        response_type: ResponseType,
        content: &str,
        done: bool,
    ) {
        let full_content = {
            let mut accumulated = self.accumulated.lock().await;
            let buffer = accumulated.entry(event_id.to_string()).or_default();
            buffer.push_str(content);
            let full = buffer.clone();
            if done {
                accumulated.remove(event_id);
            }
            full
        };

        let event = StreamEvent::new(event_id, response_type, full_content)
            .done(done)
            .with_data(json!({ "event_id": event_id }));
        if let Err(e) = self
            .store
            .replace_event(&self.session_id, &self.message_id, event)
            .await
        {
            warn!(target: "sse", error = %e, "Failed to replace stream event");
        }
    }

    async fn append(&self, event: StreamEvent) {
        if let Err(e) = self
            .store
            .append_event(&self.session_id, &self.message_id, event)
            .await
        {
            warn!(target: "sse", error = %e, "Failed to append stream event");
        }
    }
}

/// Subscribes to every agent/pipeline event kind on the dedicated bus.
pub struct StreamForwarder {
    shared: Arc<Shared>,
}

impl StreamForwarder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: mpsc::Sender<StreamFrame>,
        store: Arc<dyn StreamStore>,
        messages: Arc<dyn MessageStore>,
        assistant: Message,
        request_id: String,
    ) -> Self {
        let shared = Arc::new(Shared {
            tx,
            store,
            messages,
            session_id: assistant.session_id.clone(),
            message_id: assistant.id.clone(),
            request_id,
            accumulated: Mutex::new(HashMap::new()),
            assistant: Mutex::new(assistant),
        });
        Self { shared }
    }

    /// Register all handlers on the request's bus. No session filtering:
    /// the bus is dedicated to this request.
    pub async fn subscribe(&self, bus: &EventBus) {
        self.on_incremental(bus, EventKind::AgentThought, ResponseType::Thinking).await;
        self.on_incremental(bus, EventKind::AgentFinalAnswer, ResponseType::Answer).await;
        self.on_incremental(bus, EventKind::AgentReflection, ResponseType::Reflection).await;
        self.on_tool_call(bus).await;
        self.on_tool_result(bus).await;
        self.on_references(bus).await;
        self.on_session_title(bus).await;
        self.on_error(bus).await;
        self.on_complete(bus).await;
    }

    async fn on_incremental(
        &self,
        bus: &EventBus,
        kind: EventKind,
        response_type: ResponseType,
    ) {
        let shared = Arc::clone(&self.shared);
        bus.on(kind, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let (content, done) = match &event.data {
                    EventData::AgentThought { content, done } => (content.clone(), *done),
                    EventData::AgentFinalAnswer { content, done } => (content.clone(), *done),
                    EventData::AgentReflection { content, done } => (content.clone(), *done),
                    _ => return Ok(()),
                };

                // Answer chunks also build up the assistant message.
                if matches!(&event.data, EventData::AgentFinalAnswer { .. }) && !content.is_empty()
                {
                    shared.assistant.lock().await.content.push_str(&content);
                }

                shared
                    .accumulate_and_replace(&event.id, response_type, &content, done)
                    .await;

                let mut frame = shared.frame(response_type);
                frame.content = content;
                frame.done = done;
                frame.data = Some(json!({ "event_id": event.id }));
                shared.send_frame(frame).await;
                Ok(())
            }
        })
        .await;
    }

    async fn on_tool_call(&self, bus: &EventBus) {
        let shared = Arc::clone(&self.shared);
        bus.on(EventKind::AgentToolCall, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let EventData::AgentToolCall { tool_name, arguments } = &event.data else {
                    return Ok(());
                };
                let content = format!("Calling tool: {tool_name}");
                let data = json!({ "tool_name": tool_name, "arguments": arguments });

                shared
                    .append(
                        StreamEvent::new(&event.id, ResponseType::ToolCall, content.clone())
                            .with_data(data.clone()),
                    )
                    .await;

                let mut frame = shared.frame(ResponseType::ToolCall);
                frame.content = content;
                frame.data = Some(data);
                shared.send_frame(frame).await;
                Ok(())
            }
        })
        .await;
    }

    async fn on_tool_result(&self, bus: &EventBus) {
        let shared = Arc::clone(&self.shared);
        bus.on(EventKind::AgentToolResult, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let EventData::AgentToolResult {
                    tool_name,
                    success,
                    output,
                    error,
                    duration_ms,
                    data,
                } = &event.data
                else {
                    return Ok(());
                };

                // Failures surface as error frames so the client renders
                // them distinctly; the stream keeps flowing either way.
                let (response_type, content) = if *success {
                    (ResponseType::ToolResult, output.clone())
                } else {
                    (
                        ResponseType::Error,
                        error.clone().unwrap_or_else(|| output.clone()),
                    )
                };

                let mut metadata = json!({
                    "tool_name": tool_name,
                    "success": success,
                    "output": output,
                    "error": error,
                    "duration_ms": duration_ms,
                });
                if let (Some(extra), Some(obj)) = (data, metadata.as_object_mut()) {
                    if let Some(extra_obj) = extra.as_object() {
                        for (k, v) in extra_obj {
                            obj.insert(k.clone(), v.clone());
                        }
                    }
                }

                shared
                    .append(
                        StreamEvent::new(&event.id, response_type, content.clone())
                            .with_data(metadata.clone()),
                    )
                    .await;

                let mut frame = shared.frame(response_type);
                frame.content = content;
                frame.data = Some(metadata);
                shared.send_frame(frame).await;
                Ok(())
            }
        })
        .await;
    }

    async fn on_references(&self, bus: &EventBus) {
        let shared = Arc::clone(&self.shared);
        bus.on(EventKind::AgentReferences, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let EventData::AgentReferences { references } = &event.data else {
                    return Ok(());
                };

                shared.assistant.lock().await.knowledge_references = references.clone();

                if let Err(e) = shared
                    .store
                    .update_references(&shared.session_id, &shared.message_id, references.clone())
                    .await
                {
                    warn!(target: "sse", error = %e, "Failed to update stream references");
                }
                shared
                    .append(
                        StreamEvent::new(&event.id, ResponseType::References, "")
                            .with_data(json!({ "references": references })),
                    )
                    .await;

                let mut frame = shared.frame(ResponseType::References);
                frame.knowledge_references = Some(references.clone());
                shared.send_frame(frame).await;
                Ok(())
            }
        })
        .await;
    }

    async fn on_session_title(&self, bus: &EventBus) {
        let shared = Arc::clone(&self.shared);
        bus.on(EventKind::SessionTitle, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let EventData::SessionTitle { session_id, title } = &event.data else {
                    return Ok(());
                };
                let mut frame = shared.frame(ResponseType::SessionTitle);
                frame.content = title.clone();
                frame.done = true;
                frame.data = Some(json!({ "session_id": session_id, "title": title }));
                shared.send_frame(frame).await;
                Ok(())
            }
        })
        .await;
    }

    async fn on_error(&self, bus: &EventBus) {
        let shared = Arc::clone(&self.shared);
        bus.on(EventKind::Error, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let EventData::Error { error, stage, .. } = &event.data else {
                    return Ok(());
                };

                shared
                    .append(
                        StreamEvent::new(&event.id, ResponseType::Error, error.clone())
                            .done(true)
                            .with_data(json!({ "stage": stage })),
                    )
                    .await;

                let mut frame = shared.frame(ResponseType::Error);
                frame.content = error.clone();
                frame.done = true;
                frame.data = Some(json!({ "stage": stage }));
                shared.send_frame(frame).await;

                // An error terminates the stream: finalize with whatever
                // content accumulated.
                let mut assistant = shared.assistant.lock().await.clone();
                assistant.is_completed = true;
                assistant.updated_at = chrono::Utc::now();
                if let Err(e) = shared.messages.update(&assistant).await {
                    warn!(target: "sse", error = %e, "Failed to finalize assistant message");
                }
                if let Err(e) = shared
                    .store
                    .complete_stream(&shared.session_id, &shared.message_id)
                    .await
                {
                    warn!(target: "sse", error = %e, "Failed to complete stream");
                }
                Ok(())
            }
        })
        .await;
    }

    async fn on_complete(&self, bus: &EventBus) {
        let shared = Arc::clone(&self.shared);
        bus.on(EventKind::AgentComplete, move |event| {
            let shared = Arc::clone(&shared);
            async move {
                let EventData::AgentComplete {
                    message_id,
                    final_answer,
                    knowledge_refs,
                    agent_steps,
                    ..
                } = &event.data
                else {
                    return Ok(());
                };
                if *message_id != shared.message_id {
                    return Ok(());
                }

                {
                    let mut assistant = shared.assistant.lock().await;
                    assistant.content = final_answer.clone();
                    if !knowledge_refs.is_empty() {
                        assistant.knowledge_references = knowledge_refs.clone();
                    }
                    assistant.agent_steps = agent_steps.clone();
                    assistant.is_completed = true;
                    assistant.updated_at = chrono::Utc::now();
                    if let Err(e) = shared.messages.update(&assistant).await {
                        warn!(target: "sse", error = %e, "Failed to finalize assistant message");
                    }
                }

                shared
                    .append(StreamEvent::new(&event.id, ResponseType::Complete, "").done(true))
                    .await;

                let mut frame = shared.frame(ResponseType::Complete);
                frame.done = true;
                frame.session_id = Some(shared.session_id.clone());
                frame.assistant_message_id = Some(shared.message_id.clone());
                shared.send_frame(frame).await;

                if let Err(e) = shared
                    .store
                    .complete_stream(&shared.session_id, &shared.message_id)
                    .await
                {
                    warn!(target: "sse", error = %e, "Failed to complete stream");
                }
                Ok(())
            }
        })
        .await;
    }
}
