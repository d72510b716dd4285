// Agent-mode question answering over SSE.
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use weknora_core::agent::AgentEngine;
use weknora_core::event::EventBus;
use weknora_core::storage::{KnowledgeBaseCatalog, SessionStore};
use weknora_core::stream::StreamStore;
use weknora_core::tools::ToolContext;
use weknora_core::types::{
    AgentConfig, CancelToken, ChatMessage, ResponseType, Role, Session, StreamEvent, StreamFrame,
};

use super::rag::run_rag_request;
use super::{
    create_message_pair, generate_title_async, request_id, sse_response, tenant_id, QaRequest,
    StreamForwarder,
};
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/v1/sessions/{id}/agent`
///
/// With `agent_enabled = false` the request delegates to the RAG flow; the
/// SSE framing is identical either way.
pub async fn agent_qa(
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

    let kb_ids = resolve_knowledge_bases(&state, tenant, &session, &request).await?;

    if !request.agent_enabled {
        info!(target: "server", session_id = %session_id, "Agent disabled, delegating to RAG");
        return run_rag_request(
            state,
            session,
            rid,
            request.query,
            kb_ids,
            request.web_search_enabled,
        )
        .await;
    }

    let agent_config = AgentConfig {
        enabled: true,
        thinking_model_id: session.summary_model_id.clone(),
        rerank_model_id: session.rerank_model_id.clone(),
        knowledge_bases: kb_ids,
        ..Default::default()
    };
    agent_config.validate().map_err(ApiError::from)?;

    // knowledge_search / get_related_chunks carry this request's KB scope.
    state
        .register_search_tools(agent_config.knowledge_bases.clone(), &agent_config.rerank_model_id)
        .await;

    let assistant = create_message_pair(&state, &session_id, &rid, &request.query).await?;
    let message_id = assistant.id.clone();

    state
        .stream_store
        .register_stream(&session_id, &message_id, &request.query)
        .await?;

    let (tx, rx) = mpsc::channel::<StreamFrame>(256);

    // The initial agent_query event: live clients get immediate feedback
    // and resuming clients see the question at offset zero.
    let query_data = json!({
        "session_id": session_id,
        "query": request.query,
        "request_id": rid,
    });
    state
        .stream_store
        .append_event(
            &session_id,
            &message_id,
            StreamEvent::new(
                format!("{rid}-query"),
                ResponseType::AgentQuery,
                "Agent query processing started",
            )
            .with_data(query_data.clone()),
        )
        .await?;
    let mut query_frame = StreamFrame::new(rid.clone(), ResponseType::AgentQuery);
    query_frame.content = "Agent query processing started".to_string();
    query_frame.data = Some(query_data);
    let _ = tx.send(query_frame).await;

    let bus = Arc::new(EventBus::new());
    let forwarder = StreamForwarder::new(
        tx.clone(),
        Arc::clone(&state.stream_store),
        Arc::clone(&state.messages),
        assistant,
        rid.clone(),
    );
    forwarder.subscribe(&bus).await;

    generate_title_async(&state, &session, &request.query, Arc::clone(&bus));

    let cancel = CancelToken::new();
    super::stream::spawn_stop_watcher(
        &state,
        session_id.clone(),
        message_id.clone(),
        rid.clone(),
        tx,
        cancel.clone(),
    );

    let engine = AgentEngine::new(
        agent_config,
        Arc::clone(&state.registry),
        Arc::clone(&state.models),
        Arc::clone(&state.catalog),
        Arc::clone(&bus),
    )
    .map_err(ApiError::from)?;

    let ctx = ToolContext {
        tenant_id: tenant,
        session_id: session_id.clone(),
        request_id: rid.clone(),
        cancel,
    };
    let query = request.query.clone();
    let orchestration_state = state.clone();
    tokio::spawn(async move {
        let history = match orchestration_state.context_manager.get_context(&ctx.session_id).await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(target: "server", error = %e, "Failed to load LLM context, continuing without history");
                Vec::new()
            }
        };

        match engine.execute(&ctx, &message_id, &query, history).await {
            Ok(outcome) => {
                if !outcome.stopped {
                    record_agent_context(
                        &orchestration_state,
                        &ctx.session_id,
                        &query,
                        &outcome.final_answer,
                    )
                    .await;
                }
                info!(
                    target: "server",
                    session_id = %ctx.session_id,
                    steps = outcome.steps.len(),
                    stopped = outcome.stopped,
                    "Agent run finished"
                );
            }
            Err(e) => {
                // The engine already emitted the error event; the forwarder
                // finalized the message and completed the stream.
                error!(target: "server", session_id = %ctx.session_id, error = %e, "Agent execution failed");
            }
        }
    });

    Ok(sse_response(rx).into_response())
}

/// Knowledge-base resolution order: explicit request > session agent
/// config > session default KB > all KBs visible to the tenant.
async fn resolve_knowledge_bases(
    state: &AppState,
    tenant: u64,
    session: &Session,
    request: &QaRequest,
) -> Result<Vec<String>, ApiError> {
    if !request.knowledge_base_ids.is_empty() {
        return Ok(request.knowledge_base_ids.clone());
    }
    if let Some(agent_config) = &session.agent_config {
        if !agent_config.knowledge_bases.is_empty() {
            return Ok(agent_config.knowledge_bases.clone());
        }
    }
    if !session.knowledge_base_id.is_empty() {
        return Ok(vec![session.knowledge_base_id.clone()]);
    }

    let all = state.catalog.list_knowledge_bases(tenant).await.map_err(ApiError::from)?;
    if all.is_empty() {
        return Err(ApiError::bad_request(
            "no knowledge bases available; configure at least one knowledge base",
        ));
    }
    Ok(all.into_iter().map(|kb| kb.id).collect())
}

async fn record_agent_context(state: &AppState, session_id: &str, query: &str, answer: &str) {
    let manager = &state.context_manager;
    if let Err(e) = manager.add_message(session_id, ChatMessage::user(query)).await {
        warn!(target: "server", error = %e, "Failed to record user turn in context");
    }
    if !answer.is_empty() {
        if let Err(e) = manager
            .add_message(
                session_id,
                ChatMessage { role: Role::Assistant, content: answer.to_string() },
            )
            .await
        {
            warn!(target: "server", error = %e, "Failed to record assistant turn in context");
        }
    }
}
