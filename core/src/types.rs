//! Shared data model: sessions, messages, stream events, search results and
//! the agent configuration surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

/// Content recorded on an assistant message that was stopped by the user.
pub const STOP_SENTINEL: &str = "[stopped by user]";

/// Role of a chat message exchanged with the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single LLM conversation message, independent from the persisted
/// message table (see [`Message`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Wire-level type of a stream event / SSE frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Thinking,
    ToolCall,
    ToolResult,
    References,
    Answer,
    Reflection,
    Error,
    AgentQuery,
    Complete,
    Stop,
    SessionTitle,
}

/// A single event in a per-message stream log.
///
/// `id` is a stable key for one logical event: token-by-token LLM output
/// (thinking, answer, reflection) is persisted by replacing the event with
/// the same id so the log stays bounded while refreshing clients still see
/// partial progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: ResponseType,
    pub content: String,
    pub done: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StreamEvent {
    pub fn new(id: impl Into<String>, event_type: ResponseType, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type,
            content: content.into(),
            done: false,
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// SSE frame sent to clients. Mirrors [`StreamEvent`] plus request routing
/// fields the frontend needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    pub id: String,
    pub response_type: ResponseType,
    #[serde(default)]
    pub content: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_references: Option<Vec<SearchResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
}

impl StreamFrame {
    pub fn new(id: impl Into<String>, response_type: ResponseType) -> Self {
        Self {
            id: id.into(),
            response_type,
            content: String::new(),
            done: false,
            data: None,
            knowledge_references: None,
            session_id: None,
            assistant_message_id: None,
        }
    }
}

/// How a retrieved chunk matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Embedding,
    Keyword,
    Graph,
    Web,
    History,
}

/// One retrieved chunk. The chunk `id` is the identity key used for
/// deduplication across the fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub knowledge_id: String,
    pub knowledge_base_id: String,
    #[serde(default)]
    pub knowledge_title: String,
    pub chunk_index: i32,
    pub score: f64,
    pub match_type: MatchType,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Smallest retrievable unit of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub knowledge_id: String,
    pub knowledge_base_id: String,
    pub content: String,
    pub chunk_index: i32,
}

/// Document descriptor surfaced in knowledge-base catalogs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Knowledge-base descriptor used for agent prompt assembly and KB
/// resolution. The index itself stays opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recent_documents: Vec<DocumentInfo>,
}

/// Retrieval parameters passed to the external hybrid-search backend.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query_text: String,
    pub match_count: usize,
    pub vector_threshold: f64,
    pub keyword_threshold: f64,
}

/// Result of one tool execution. A failing tool reports `success = false`
/// rather than raising, so the agent can keep reasoning with the signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into(), error: None, data: None }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self { success: false, output: String::new(), error: Some(error.into()), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// LLM-facing function definition for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One iteration of the agent loop, recorded on the assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub step_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection: Option<String>,
    pub elapsed_ms: u64,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
}

/// Agent behavior knobs. Resolution of knowledge bases is
/// config > session default > all tenant KBs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub enabled: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub reflection_enabled: bool,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub thinking_model_id: String,
    #[serde(default)]
    pub rerank_model_id: String,
    #[serde(default)]
    pub knowledge_bases: Vec<String>,
}

fn default_max_iterations() -> usize {
    10
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_iterations: default_max_iterations(),
            reflection_enabled: false,
            allowed_tools: Vec::new(),
            temperature: default_temperature(),
            thinking_model_id: String::new(),
            rerank_model_id: String::new(),
            knowledge_bases: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Validate user-controlled knobs against their documented ranges.
    pub fn validate(&self) -> crate::Result<()> {
        if !(1..=30).contains(&self.max_iterations) {
            return Err(crate::WeKnoraError::InvalidArgument(format!(
                "max_iterations must be within [1, 30], got {}",
                self.max_iterations
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(crate::WeKnoraError::InvalidArgument(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Session-level agent settings persisted with the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionAgentConfig {
    pub enabled: bool,
    #[serde(default)]
    pub knowledge_bases: Vec<String>,
}

/// Context compression strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    SlidingWindow,
    Smart,
}

/// Per-session context-manager overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub enabled: bool,
    pub compression_strategy: CompressionKind,
    pub max_tokens: usize,
    pub recent_message_count: usize,
}

/// Generation parameters for the summary / chat model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub max_tokens: usize,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub top_p: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub context_template: String,
    #[serde(default)]
    pub no_match_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.3,
            top_p: 0.9,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            prompt: String::new(),
            context_template: String::new(),
            no_match_prefix: String::new(),
            seed: None,
        }
    }
}

/// A conversation session. Created by session CRUD, read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub tenant_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub knowledge_base_id: String,
    #[serde(default)]
    pub summary_model_id: String,
    #[serde(default)]
    pub rerank_model_id: String,
    pub vector_threshold: f64,
    pub keyword_threshold: f64,
    pub embedding_top_k: usize,
    pub rerank_top_k: usize,
    pub rerank_threshold: f64,
    #[serde(default)]
    pub fallback_response: String,
    #[serde(default)]
    pub summary_parameters: SummaryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<SessionAgentConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_config: Option<ContextConfig>,
    pub created_at: DateTime<Utc>,
}

/// A persisted conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_completed: bool,
    #[serde(default)]
    pub knowledge_references: Vec<SearchResult>,
    #[serde(default)]
    pub agent_steps: Vec<AgentStep>,
}

/// Context-manager statistics for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextStats {
    pub message_count: usize,
    pub token_count: usize,
    pub is_compressed: bool,
    pub original_message_count: usize,
}

/// Cooperative cancellation handle shared between a request's SSE handler
/// and its orchestration task. Checked at suspension points; `cancelled()`
/// can be awaited in `select!` arms for prompt exits.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
