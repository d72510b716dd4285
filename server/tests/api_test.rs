// End-to-end handler tests over a real listener.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use weknora_core::config::Config;
use weknora_core::llm::{
    ChatModel, ChatOptions, ChatResponse, ModelProvider, StaticModelProvider, StreamChunk,
};
use weknora_core::mcp::{McpClient, McpError, McpToolOutcome, McpToolSpec};
use weknora_core::search::RetrievalBackend;
use weknora_core::storage::{MessageStore, SessionStore};
use weknora_core::stream::StreamStore;
use weknora_core::types::{
    ChatMessage, FunctionDefinition, Message, ResponseType, Role, SearchParams, SearchResult,
    Session, StreamEvent, SummaryConfig, STOP_SENTINEL,
};
use weknora_server::state::{Backends, MemoryKbCatalog};
use weknora_server::{build_router, AppState};

struct CannedModel;

#[async_trait]
impl ChatModel for CannedModel {
    fn model_name(&self) -> String {
        "canned".to_string()
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _opts: &ChatOptions,
    ) -> weknora_core::Result<ChatResponse> {
        Ok(ChatResponse { content: "A short title".to_string() })
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: &[FunctionDefinition],
        _opts: &ChatOptions,
    ) -> weknora_core::Result<mpsc::Receiver<StreamChunk>> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(StreamChunk { content: "Hello from the model".to_string(), ..Default::default() })
                .await;
            let _ = tx.send(StreamChunk { done: true, ..Default::default() }).await;
        });
        Ok(rx)
    }
}

struct EmptyBackend;

#[async_trait]
impl RetrievalBackend for EmptyBackend {
    async fn hybrid_search(
        &self,
        _kb_id: &str,
        _params: SearchParams,
    ) -> weknora_core::Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

struct NotesService;

#[async_trait]
impl McpClient for NotesService {
    fn service_name(&self) -> &str {
        "notes"
    }

    async fn list_tools(&self) -> Result<Vec<McpToolSpec>, McpError> {
        Ok(vec![McpToolSpec {
            name: "lookup".to_string(),
            description: Some("Look up a note".to_string()),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }])
    }

    async fn call_tool(
        &self,
        _name: &str,
        _arguments: Option<serde_json::Value>,
    ) -> Result<McpToolOutcome, McpError> {
        Ok(McpToolOutcome { content: "note text".to_string(), is_error: false })
    }
}

async fn start_server() -> (String, AppState) {
    let models: Arc<dyn ModelProvider> =
        Arc::new(StaticModelProvider::new(Arc::new(CannedModel), None));
    let backends = Backends {
        models,
        retrieval: Arc::new(EmptyBackend),
        catalog: Arc::new(MemoryKbCatalog::new()),
        web_search: None,
        kv: weknora_server::state::default_kv(),
        chunks: None,
        sql: None,
        graph: None,
        mcp_clients: Vec::new(),
    };
    let state = AppState::new(Config::default(), backends).await;
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

async fn create_session(state: &AppState, tenant: u64) -> Session {
    state
        .sessions
        .create(Session {
            id: String::new(),
            tenant_id: tenant,
            title: "existing title".to_string(),
            knowledge_base_id: "kb1".to_string(),
            summary_model_id: "chat".to_string(),
            rerank_model_id: String::new(),
            vector_threshold: 0.6,
            keyword_threshold: 0.5,
            embedding_top_k: 5,
            rerank_top_k: 10,
            rerank_threshold: 0.3,
            fallback_response: "I don't know based on the knowledge base.".to_string(),
            summary_parameters: SummaryConfig::default(),
            agent_config: None,
            context_config: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn empty_query_is_rejected_before_streaming() {
    let (base, state) = start_server().await;
    let session = create_session(&state, 1).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/sessions/{}/agent", session.id))
        .header("x-tenant-id", "1")
        .json(&serde_json::json!({ "query": "", "agent_enabled": true }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn missing_tenant_header_is_unauthorized() {
    let (base, state) = start_server().await;
    let session = create_session(&state, 1).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/sessions/{}/qa", session.id))
        .json(&serde_json::json!({ "query": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (base, _state) = start_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/sessions/does-not-exist/qa"))
        .header("x-tenant-id", "1")
        .json(&serde_json::json!({ "query": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

/// Empty retrieval resolves into the configured fallback response: one
/// answer frame with `done = true`, then a completion frame.
#[tokio::test]
async fn rag_with_no_results_streams_the_fallback() {
    let (base, state) = start_server().await;
    let session = create_session(&state, 1).await;

    let client = reqwest::Client::new();
    let body = client
        .post(format!("{base}/api/v1/sessions/{}/qa", session.id))
        .header("x-tenant-id", "1")
        .json(&serde_json::json!({ "query": "anything" }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("I don't know based on the knowledge base."));
    assert!(body.contains("\"response_type\":\"answer\""));
    assert!(body.contains("\"response_type\":\"complete\""));

    // The assistant message was finalized with the fallback content.
    let messages = state.messages.list_by_session(&session.id).await.unwrap();
    let assistant = messages.iter().find(|m| m.role == Role::Assistant).unwrap();
    assert!(assistant.is_completed);
    assert_eq!(assistant.content, "I don't know based on the knowledge base.");
}

#[tokio::test]
async fn stop_marks_message_with_sentinel_and_persists_stop_event() {
    let (base, state) = start_server().await;
    let session = create_session(&state, 1).await;

    let now = Utc::now();
    let message = state
        .messages
        .create(Message {
            id: String::new(),
            session_id: session.id.clone(),
            role: Role::Assistant,
            content: String::new(),
            request_id: "r1".to_string(),
            created_at: now,
            updated_at: now,
            is_completed: false,
            knowledge_references: Vec::new(),
            agent_steps: Vec::new(),
        })
        .await
        .unwrap();
    state
        .stream_store
        .register_stream(&session.id, &message.id, "question")
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/sessions/{}/stop", session.id))
        .header("x-tenant-id", "1")
        .json(&serde_json::json!({ "message_id": message.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let stopped = state.messages.get(&session.id, &message.id).await.unwrap().unwrap();
    assert!(stopped.is_completed);
    assert_eq!(stopped.content, STOP_SENTINEL);

    let (events, _) = state
        .stream_store
        .get_events(&session.id, &message.id, 0)
        .await
        .unwrap();
    assert!(events.iter().any(|e| matches!(e.event_type, ResponseType::Stop) && e.done));
}

/// Resume: the recorded log replays from offset zero and ends with the
/// terminal event for a completed stream.
#[tokio::test]
async fn continue_stream_replays_completed_log() {
    let (base, state) = start_server().await;
    let session = create_session(&state, 1).await;

    let now = Utc::now();
    let message = state
        .messages
        .create(Message {
            id: String::new(),
            session_id: session.id.clone(),
            role: Role::Assistant,
            content: "the final answer".to_string(),
            request_id: "r1".to_string(),
            created_at: now,
            updated_at: now,
            is_completed: true,
            knowledge_references: Vec::new(),
            agent_steps: Vec::new(),
        })
        .await
        .unwrap();

    state
        .stream_store
        .register_stream(&session.id, &message.id, "question")
        .await
        .unwrap();
    state
        .stream_store
        .append_event(
            &session.id,
            &message.id,
            StreamEvent::new("q", ResponseType::AgentQuery, "question"),
        )
        .await
        .unwrap();
    state
        .stream_store
        .replace_event(
            &session.id,
            &message.id,
            StreamEvent::new("a", ResponseType::Answer, "the final answer").done(true),
        )
        .await
        .unwrap();
    state
        .stream_store
        .complete_stream(&session.id, &message.id)
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let body = client
        .get(format!(
            "{base}/api/v1/sessions/{}/stream?message_id={}",
            session.id, message.id
        ))
        .header("x-tenant-id", "1")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("\"response_type\":\"agent_query\""));
    assert!(body.contains("the final answer"));
    let query_pos = body.find("agent_query").unwrap();
    let answer_pos = body.find("the final answer").unwrap();
    assert!(query_pos < answer_pos, "replay preserves append order");
}

/// Connected MCP services register their tools during state construction,
/// and those tools stay exposed to agents even under a restrictive
/// allow-list.
#[tokio::test]
async fn mcp_tools_register_at_startup() {
    let models: Arc<dyn ModelProvider> =
        Arc::new(StaticModelProvider::new(Arc::new(CannedModel), None));
    let backends = Backends {
        models,
        retrieval: Arc::new(EmptyBackend),
        catalog: Arc::new(MemoryKbCatalog::new()),
        web_search: None,
        kv: weknora_server::state::default_kv(),
        chunks: None,
        sql: None,
        graph: None,
        mcp_clients: vec![Arc::new(NotesService)],
    };
    let state = AppState::new(Config::default(), backends).await;

    assert!(state.registry.get("mcp_notes_lookup").is_some());
    let definitions = state.registry.function_definitions(&["thinking".to_string()]);
    assert!(definitions.iter().any(|d| d.name == "mcp_notes_lookup"));
}

#[tokio::test]
async fn search_endpoint_returns_empty_set_without_error() {
    let (base, state) = start_server().await;
    let session = create_session(&state, 1).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/v1/sessions/{}/search", session.id))
        .header("x-tenant-id", "1")
        .json(&serde_json::json!({ "query": "anything" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}
