//! HTTP/SSE request handlers.

mod agent;
mod forwarder;
mod rag;
mod stream;

pub use agent::agent_qa;
pub use forwarder::StreamForwarder;
pub use rag::{knowledge_qa, search_knowledge};
pub use stream::{continue_stream, stop};

use std::convert::Infallible;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use weknora_core::event::{Event, EventBus, EventData};
use weknora_core::llm::{ChatOptions, ModelProvider};
use weknora_core::storage::{MessageStore, SessionStore};
use weknora_core::types::{ChatMessage, Message, Role, Session, StreamFrame};

use crate::error::ApiError;
use crate::state::AppState;

/// Query request shared by the agent and RAG endpoints.
#[derive(Debug, Deserialize)]
pub struct QaRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
    #[serde(default)]
    pub agent_enabled: bool,
    #[serde(default)]
    pub web_search_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub knowledge_base_ids: Vec<String>,
}

/// Tenant context comes from the authentication middleware upstream; here
/// it is read from the header it populates.
pub(crate) fn tenant_id(headers: &HeaderMap) -> Result<u64, ApiError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::unauthorized("missing tenant context"))
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// SSE response over a frame channel. The stream ends when every sender is
/// dropped, i.e. when the orchestration and its watchers exit.
pub(crate) fn sse_response(
    rx: mpsc::Receiver<StreamFrame>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
        Ok(SseEvent::default().event("message").data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
}

/// Persist the completed user message and the incomplete assistant message
/// for a new request.
pub(crate) async fn create_message_pair(
    state: &AppState,
    session_id: &str,
    request_id: &str,
    query: &str,
) -> Result<Message, ApiError> {
    let now = Utc::now();
    state
        .messages
        .create(Message {
            id: String::new(),
            session_id: session_id.to_string(),
            role: Role::User,
            content: query.to_string(),
            request_id: request_id.to_string(),
            created_at: now,
            updated_at: now,
            is_completed: true,
            knowledge_references: Vec::new(),
            agent_steps: Vec::new(),
        })
        .await
        .map_err(ApiError::from)?;

    state
        .messages
        .create(Message {
            id: String::new(),
            session_id: session_id.to_string(),
            role: Role::Assistant,
            content: String::new(),
            request_id: request_id.to_string(),
            created_at: now,
            updated_at: now,
            is_completed: false,
            knowledge_references: Vec::new(),
            agent_steps: Vec::new(),
        })
        .await
        .map_err(ApiError::from)
}

/// Generate a session title asynchronously on the first query of an
/// untitled session; the title event reaches the live client through the
/// request bus.
pub(crate) fn generate_title_async(
    state: &AppState,
    session: &Session,
    query: &str,
    bus: Arc<EventBus>,
) {
    if !session.title.is_empty() {
        return;
    }
    let state = state.clone();
    let mut session = session.clone();
    let query = query.to_string();

    tokio::spawn(async move {
        let model = match state.models.chat_model(&session.summary_model_id).await {
            Ok(model) => model,
            Err(e) => {
                warn!(target: "server", error = %e, "Title model unavailable");
                return;
            }
        };

        let messages = vec![
            ChatMessage::system(state.config.conversation.title_prompt.clone()),
            ChatMessage::user(query),
        ];
        let opts = ChatOptions { temperature: Some(0.3), ..Default::default() };
        let title = match model.chat(&messages, &opts).await {
            Ok(response) => response.content.trim().to_string(),
            Err(e) => {
                warn!(target: "server", error = %e, "Title generation failed");
                return;
            }
        };
        if title.is_empty() {
            return;
        }

        session.title = title.clone();
        if let Err(e) = state.sessions.update(&session).await {
            warn!(target: "server", error = %e, "Failed to persist session title");
        }
        info!(target: "server", session_id = %session.id, title = %title, "Session title generated");

        bus.emit(Event::new(
            format!("{}-title", session.id),
            session.id.clone(),
            EventData::SessionTitle { session_id: session.id.clone(), title },
        ))
        .await;
    });
}
