// RAG-mode question answering and the synchronous search endpoint.
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use weknora_core::event::{Event, EventBus, EventData};
use weknora_core::pipeline::{
    rag_stream_stages, search_only_stages, ChatManage, PipelineStage,
};
use weknora_core::storage::{MessageStore, SessionStore};
use weknora_core::stream::StreamStore;
use weknora_core::types::{CancelToken, ChatMessage, Role, Session, StreamFrame, STOP_SENTINEL};

use super::{
    create_message_pair, generate_title_async, request_id, sse_response, tenant_id, QaRequest,
    SearchRequest, StreamForwarder,
};
use crate::error::ApiError;
use crate::state::AppState;

/// Conversation rounds folded into the pipeline's history.
const HISTORY_LIMIT: usize = 10;

/// `POST /api/v1/sessions/{id}/qa`
pub async fn knowledge_qa(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<QaRequest>,
) -> Result<Response, ApiError> {
    let tenant = tenant_id(&headers)?;
    let rid = request_id(&headers);

    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query content cannot be empty"));
    }

    let session = state
        .sessions
        .get(tenant, &session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;

    let mut kb_ids = request.knowledge_base_ids.clone();
    if kb_ids.is_empty() && !session.knowledge_base_id.is_empty() {
        kb_ids = vec![session.knowledge_base_id.clone()];
    }
    if kb_ids.is_empty() {
        return Err(ApiError::bad_request("at least one knowledge base id is required"));
    }

    run_rag_request(
        state,
        session,
        rid,
        request.query,
        kb_ids,
        request.web_search_enabled,
    )
    .await
}

/// Shared RAG flow, also used when the agent endpoint is called with
/// `agent_enabled = false`.
pub(crate) async fn run_rag_request(
    state: AppState,
    session: Session,
    rid: String,
    query: String,
    kb_ids: Vec<String>,
    web_search_enabled: bool,
) -> Result<Response, ApiError> {
    let assistant = create_message_pair(&state, &session.id, &rid, &query).await?;
    let message_id = assistant.id.clone();

    state
        .stream_store
        .register_stream(&session.id, &message_id, &query)
        .await?;

    let (tx, rx) = mpsc::channel::<StreamFrame>(256);
    let bus = Arc::new(EventBus::new());
    let forwarder = StreamForwarder::new(
        tx.clone(),
        Arc::clone(&state.stream_store),
        Arc::clone(&state.messages),
        assistant,
        rid.clone(),
    );
    forwarder.subscribe(&bus).await;

    generate_title_async(&state, &session, &query, Arc::clone(&bus));

    let cancel = CancelToken::new();
    super::stream::spawn_stop_watcher(
        &state,
        session.id.clone(),
        message_id.clone(),
        rid.clone(),
        tx,
        cancel.clone(),
    );

    let history = load_history(&state, &session.id, &rid).await;
    let mut chat = build_chat_manage(&state, &session, &rid, &query, kb_ids);
    chat.message_id = message_id.clone();
    chat.history = history;
    chat.web_search_enabled = web_search_enabled;
    chat.event_bus = Some(Arc::clone(&bus));
    chat.cancel = cancel.clone();

    tokio::spawn(async move {
        run_rag_orchestration(state, session, chat, bus, cancel).await;
    });

    Ok(sse_response(rx).into_response())
}

/// `POST /api/v1/sessions/{id}/search` — retrieval without generation.
pub async fn search_knowledge(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let rid = request_id(&headers);

    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query content cannot be empty"));
    }
    let session = state
        .sessions
        .get(tenant, &session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("session not found"))?;

    let mut kb_ids = request.knowledge_base_ids;
    if kb_ids.is_empty() && !session.knowledge_base_id.is_empty() {
        kb_ids = vec![session.knowledge_base_id.clone()];
    }
    if kb_ids.is_empty() {
        return Err(ApiError::bad_request("at least one knowledge base id is required"));
    }

    let mut chat = build_chat_manage(&state, &session, &rid, &request.query, kb_ids);
    match state.event_manager.run_stages(&search_only_stages(), &mut chat).await {
        Ok(()) => {}
        Err(e) if e.is_search_nothing() => {
            return Ok(Json(json!({ "success": true, "data": [] })));
        }
        Err(e) => {
            error!(target: "server", error = %e, "Search pipeline failed");
            return Err(ApiError::internal(e.to_string()));
        }
    }

    info!(
        target: "server",
        session_id = %session_id,
        count = chat.merge_result.len(),
        "Synchronous search finished"
    );
    Ok(Json(json!({ "success": true, "data": chat.merge_result })))
}

fn build_chat_manage(
    state: &AppState,
    session: &Session,
    rid: &str,
    query: &str,
    kb_ids: Vec<String>,
) -> ChatManage {
    let defaults = &state.config.conversation;
    let pick = |value: f64, fallback: f64| if value > 0.0 { value } else { fallback };

    let fallback_response = if session.fallback_response.is_empty() {
        defaults.fallback_response.clone()
    } else {
        session.fallback_response.clone()
    };
    let mut summary_config = session.summary_parameters.clone();
    if summary_config.no_match_prefix.is_empty() {
        summary_config.no_match_prefix = defaults.no_match_prefix.clone();
    }

    ChatManage {
        query: query.to_string(),
        rewrite_query: query.to_string(),
        session_id: session.id.clone(),
        request_id: rid.to_string(),
        tenant_id: session.tenant_id,
        knowledge_base_ids: kb_ids,
        vector_threshold: pick(session.vector_threshold, defaults.vector_threshold),
        keyword_threshold: pick(session.keyword_threshold, defaults.keyword_threshold),
        embedding_top_k: if session.embedding_top_k > 0 {
            session.embedding_top_k
        } else {
            defaults.embedding_top_k
        },
        rerank_model_id: session.rerank_model_id.clone(),
        rerank_top_k: if session.rerank_top_k > 0 {
            session.rerank_top_k
        } else {
            defaults.rerank_top_k
        },
        rerank_threshold: pick(session.rerank_threshold, defaults.rerank_threshold),
        chat_model_id: session.summary_model_id.clone(),
        summary_config,
        fallback_response,
        ..Default::default()
    }
}

async fn load_history(
    state: &AppState,
    session_id: &str,
    rid: &str,
) -> Vec<weknora_core::types::Message> {
    match state.messages.list_by_session(session_id).await {
        Ok(messages) => {
            let mut history: Vec<_> = messages
                .into_iter()
                .filter(|m| m.request_id != rid && m.is_completed)
                .collect();
            if history.len() > HISTORY_LIMIT * 2 {
                history.drain(..history.len() - HISTORY_LIMIT * 2);
            }
            history
        }
        Err(e) => {
            warn!(target: "server", error = %e, "Failed to load history");
            Vec::new()
        }
    }
}

async fn run_rag_orchestration(
    state: AppState,
    session: Session,
    mut chat: ChatManage,
    bus: Arc<EventBus>,
    cancel: CancelToken,
) {
    let retrieval_stages = search_only_stages();
    let generation_stages: Vec<PipelineStage> = rag_stream_stages()
        .into_iter()
        .filter(|stage| !retrieval_stages.contains(stage))
        .collect();

    match state.event_manager.run_stages(&retrieval_stages, &mut chat).await {
        Ok(()) => {}
        Err(e) if e.is_search_nothing() => {
            // Fallback response instead of an error: one answer frame, then
            // completion.
            info!(
                target: "server",
                session_id = %chat.session_id,
                "Search found nothing, emitting fallback response"
            );
            emit_fallback(&bus, &chat).await;
            record_context(&state, &session, &chat.query, &chat.fallback_response).await;
            return;
        }
        Err(e) => {
            emit_pipeline_error(&bus, &chat, &e.to_string()).await;
            return;
        }
    }

    bus.emit(
        Event::new(
            format!("{}-references", chat.request_id),
            chat.session_id.clone(),
            EventData::AgentReferences { references: chat.merge_result.clone() },
        )
        .with_request_id(chat.request_id.clone()),
    )
    .await;

    if let Err(e) = state.event_manager.run_stages(&generation_stages, &mut chat).await {
        emit_pipeline_error(&bus, &chat, &e.to_string()).await;
        return;
    }

    if cancel.is_cancelled() {
        finalize_stopped(&state, &chat).await;
        return;
    }

    // The completion handler has already finalized the assistant message;
    // read it back for the context history.
    match state.messages.get(&chat.session_id, &chat.message_id).await {
        Ok(Some(message)) => {
            record_context(&state, &session, &chat.query, &message.content).await;
        }
        _ => warn!(target: "server", "Assistant message missing after completion"),
    }
}

async fn emit_fallback(bus: &EventBus, chat: &ChatManage) {
    bus.emit(
        Event::new(
            format!("{}-fallback", chat.request_id),
            chat.session_id.clone(),
            EventData::AgentFinalAnswer {
                content: chat.fallback_response.clone(),
                done: true,
            },
        )
        .with_request_id(chat.request_id.clone()),
    )
    .await;
    bus.emit(
        Event::new(
            format!("{}-complete", chat.request_id),
            chat.session_id.clone(),
            EventData::AgentComplete {
                session_id: chat.session_id.clone(),
                message_id: chat.message_id.clone(),
                final_answer: chat.fallback_response.clone(),
                knowledge_refs: Vec::new(),
                agent_steps: Vec::new(),
            },
        )
        .with_request_id(chat.request_id.clone()),
    )
    .await;
}

async fn emit_pipeline_error(bus: &EventBus, chat: &ChatManage, error: &str) {
    error!(
        target: "server",
        session_id = %chat.session_id,
        error = %error,
        "RAG pipeline failed"
    );
    bus.emit(
        Event::new(
            format!("{}-error", chat.request_id),
            chat.session_id.clone(),
            EventData::Error {
                error: error.to_string(),
                stage: "rag_pipeline".to_string(),
                session_id: chat.session_id.clone(),
            },
        )
        .with_request_id(chat.request_id.clone()),
    )
    .await;
}

async fn finalize_stopped(state: &AppState, chat: &ChatManage) {
    if let Ok(Some(mut message)) =
        state.messages.get(&chat.session_id, &chat.message_id).await
    {
        message.content = STOP_SENTINEL.to_string();
        message.is_completed = true;
        message.updated_at = chrono::Utc::now();
        let _ = state.messages.update(&message).await;
    }
    let _ = state
        .stream_store
        .complete_stream(&chat.session_id, &chat.message_id)
        .await;
}

async fn record_context(state: &AppState, session: &Session, query: &str, answer: &str) {
    let manager = &state.context_manager;
    if let Err(e) = manager.add_message(&session.id, ChatMessage::user(query)).await {
        warn!(target: "server", error = %e, "Failed to record user turn in context");
    }
    if !answer.is_empty() {
        if let Err(e) = manager
            .add_message(&session.id, ChatMessage { role: Role::Assistant, content: answer.to_string() })
            .await
        {
            warn!(target: "server", error = %e, "Failed to record assistant turn in context");
        }
    }
}
