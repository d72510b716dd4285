// Stop and resumable-stream endpoints.
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use weknora_core::storage::{MessageStore, SessionStore};
use weknora_core::stream::StreamStore;
use weknora_core::types::{
    CancelToken, ResponseType, StreamEvent, StreamFrame, STOP_SENTINEL,
};

use super::{request_id, sse_response, tenant_id, StopRequest};
use crate::error::ApiError;
use crate::state::AppState;

/// Watches the stream store for a persisted `stop` event: forwards it to
/// the live client and cancels the request's orchestration. Exits once the
/// stream completes or disappears.
pub(crate) fn spawn_stop_watcher(
    state: &AppState,
    session_id: String,
    message_id: String,
    rid: String,
    tx: mpsc::Sender<StreamFrame>,
    cancel: CancelToken,
) {
    let store = std::sync::Arc::clone(&state.stream_store);
    let poll_interval = state.config.stream.poll_interval();

    tokio::spawn(async move {
        let mut stop_forwarded = false;
        loop {
            tokio::time::sleep(poll_interval).await;

            let info = match store.get_stream(&session_id, &message_id).await {
                Ok(Some(info)) => info,
                _ => break,
            };

            if !stop_forwarded {
                if let Some(stop_event) = info
                    .events
                    .iter()
                    .find(|e| matches!(e.event_type, ResponseType::Stop))
                {
                    stop_forwarded = true;
                    info!(
                        target: "sse",
                        session_id = %session_id,
                        message_id = %message_id,
                        "Stop observed, cancelling orchestration"
                    );
                    cancel.cancel();

                    let mut frame = StreamFrame::new(rid.clone(), ResponseType::Stop);
                    frame.content = stop_event.content.clone();
                    frame.done = true;
                    frame.data = stop_event.data.clone();
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }

            if info.is_completed {
                break;
            }
        }
        debug!(target: "sse", session_id = %session_id, "Stop watcher exited");
    });
}

/// `POST /api/v1/sessions/{id}/stop`
///
/// Writes a `stop` event into the stream store; the running SSE handler
/// observes it, emits it to the client and cancels its context. The
/// assistant message is completed with the stop sentinel.
pub async fn stop(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StopRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = tenant_id(&headers)?;

    state
        .sessions
        .get(tenant, &session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;

    let mut message = state
        .messages
        .get(&session_id, &request.message_id)
        .await?
        .ok_or_else(|| ApiError::not_found("message not found"))?;

    let stop_event = StreamEvent::new(
        format!("{}-stop", request.message_id),
        ResponseType::Stop,
        "generation stopped by user",
    )
    .done(true)
    .with_data(json!({
        "session_id": session_id,
        "message_id": request.message_id,
        "reason": "user_requested",
    }));
    state
        .stream_store
        .append_event(&session_id, &request.message_id, stop_event)
        .await?;

    message.content = STOP_SENTINEL.to_string();
    message.is_completed = true;
    message.updated_at = chrono::Utc::now();
    if let Err(e) = state.messages.update(&message).await {
        warn!(target: "server", error = %e, "Failed to finalize stopped message");
    }

    info!(
        target: "server",
        session_id = %session_id,
        message_id = %request.message_id,
        "Stop accepted"
    );
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ContinueStreamParams {
    pub message_id: String,
}

/// `GET /api/v1/sessions/{id}/stream?message_id=…`
///
/// Replays the recorded event log from offset zero, then keeps polling and
/// forwarding new events until the stream completes. For a message whose
/// stream has already been reclaimed, the persisted message is returned
/// directly.
pub async fn continue_stream(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ContinueStreamParams>,
) -> Result<Response, ApiError> {
    let tenant = tenant_id(&headers)?;
    let rid = request_id(&headers);

    state
        .sessions
        .get(tenant, &session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;

    let message = state
        .messages
        .get(&session_id, &params.message_id)
        .await?
        .ok_or_else(|| ApiError::not_found("message not found"))?;

    let Some(info) = state.stream_store.get_stream(&session_id, &params.message_id).await? else {
        // Stream already reclaimed: the persisted message is the answer.
        if message.is_completed {
            return Ok(Json(json!({
                "id": message.id,
                "role": message.role,
                "content": message.content,
                "created_at": message.created_at,
                "done": true,
            }))
            .into_response());
        }
        return Err(ApiError::not_found("active stream not found"));
    };

    let (tx, rx) = mpsc::channel::<StreamFrame>(256);
    let store = std::sync::Arc::clone(&state.stream_store);
    let poll_interval = state.config.stream.poll_interval();
    let references = info.knowledge_references.clone();

    tokio::spawn(async move {
        // References first so the client can render citations immediately.
        if !references.is_empty() {
            let mut frame = StreamFrame::new(rid.clone(), ResponseType::References);
            frame.knowledge_references = Some(references);
            if tx.send(frame).await.is_err() {
                return;
            }
        }

        let mut offset = 0usize;
        loop {
            let (events, new_offset) = match store
                .get_events(&session_id, &params.message_id, offset)
                .await
            {
                Ok(read) => read,
                Err(e) => {
                    warn!(target: "sse", error = %e, "Stream read failed during resume");
                    return;
                }
            };
            offset = new_offset;

            for event in events {
                let mut frame = StreamFrame::new(rid.clone(), event.event_type);
                frame.content = event.content;
                frame.done = event.done;
                frame.data = event.data;
                if tx.send(frame).await.is_err() {
                    return;
                }
            }

            match store.get_stream(&session_id, &params.message_id).await {
                Ok(Some(info)) if !info.is_completed => {
                    tokio::time::sleep(poll_interval).await;
                }
                // Completed (terminal event already forwarded) or
                // reclaimed: drain any tail and close.
                _ => {
                    let (tail, _) = store
                        .get_events(&session_id, &params.message_id, offset)
                        .await
                        .unwrap_or_default();
                    for event in tail {
                        let mut frame = StreamFrame::new(rid.clone(), event.event_type);
                        frame.content = event.content;
                        frame.done = event.done;
                        frame.data = event.data;
                        if tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    debug!(target: "sse", "Resume stream finished");
                    return;
                }
            }
        }
    });

    Ok(sse_response(rx).into_response())
}
