//! RAG pipeline: an ordered chain of plugins driven by typed stages.
//!
//! The session layer triggers one stage at a time; every plugin activated
//! on that stage runs as a continuation chain and can short-circuit with a
//! typed error. `SearchNothing` is the sentinel that resolves into the
//! configured fallback response instead of an error.

mod chat_stream;
mod filter;
mod into_chat;
mod merge;
mod preprocess;
mod rerank;
mod search;
mod stream_filter;

pub use chat_stream::PluginChatCompletionStream;
pub use filter::PluginFilterTopK;
pub use into_chat::PluginIntoChatMessage;
pub use merge::PluginMerge;
pub use preprocess::PluginPreprocess;
pub use rerank::PluginRerank;
pub use search::PluginSearch;
pub use stream_filter::PluginStreamFilter;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::event::EventBus;
use crate::types::{CancelToken, ChatMessage, Message, SearchResult, SummaryConfig};

/// Pipeline stages, triggered in order by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    PreprocessQuery,
    ChunkSearch,
    ChunkRerank,
    ChunkMerge,
    FilterTopK,
    IntoChatMessage,
    ChatCompletionStream,
    StreamFilter,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::PreprocessQuery => "preprocess_query",
            PipelineStage::ChunkSearch => "chunk_search",
            PipelineStage::ChunkRerank => "chunk_rerank",
            PipelineStage::ChunkMerge => "chunk_merge",
            PipelineStage::FilterTopK => "filter_top_k",
            PipelineStage::IntoChatMessage => "into_chat_message",
            PipelineStage::ChatCompletionStream => "chat_completion_stream",
            PipelineStage::StreamFilter => "stream_filter",
        }
    }
}

/// Full streaming-QA stage list.
pub fn rag_stream_stages() -> Vec<PipelineStage> {
    vec![
        PipelineStage::PreprocessQuery,
        PipelineStage::ChunkSearch,
        PipelineStage::ChunkRerank,
        PipelineStage::ChunkMerge,
        PipelineStage::FilterTopK,
        PipelineStage::IntoChatMessage,
        PipelineStage::ChatCompletionStream,
        PipelineStage::StreamFilter,
    ]
}

/// Retrieval-only stage list used by the synchronous search endpoint.
pub fn search_only_stages() -> Vec<PipelineStage> {
    vec![
        PipelineStage::PreprocessQuery,
        PipelineStage::ChunkSearch,
        PipelineStage::ChunkRerank,
        PipelineStage::ChunkMerge,
        PipelineStage::FilterTopK,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginErrorKind {
    Search,
    SearchNothing,
    GetChatModel,
    ModelCall,
    Rewrite,
    Internal,
}

/// Typed pipeline error surfaced to the session layer.
#[derive(Debug, Clone)]
pub struct PluginError {
    pub kind: PluginErrorKind,
    pub description: String,
    pub cause: Option<String>,
}

impl PluginError {
    pub fn new(kind: PluginErrorKind, description: impl Into<String>) -> Self {
        Self { kind, description: description.into(), cause: None }
    }

    pub fn with_cause(mut self, cause: impl ToString) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// The no-results sentinel.
    pub fn search_nothing() -> Self {
        Self::new(PluginErrorKind::SearchNothing, "search returned no results")
    }

    pub fn is_search_nothing(&self) -> bool {
        self.kind == PluginErrorKind::SearchNothing
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.description, cause),
            None => write!(f, "{}", self.description),
        }
    }
}

/// Mutable state threaded through the pipeline for one request.
#[derive(Default)]
pub struct ChatManage {
    pub query: String,
    pub rewrite_query: String,
    pub processed_query: String,
    pub session_id: String,
    pub message_id: String,
    pub request_id: String,
    pub tenant_id: u64,
    pub knowledge_base_ids: Vec<String>,
    pub vector_threshold: f64,
    pub keyword_threshold: f64,
    pub embedding_top_k: usize,
    pub rerank_model_id: String,
    pub rerank_top_k: usize,
    pub rerank_threshold: f64,
    pub chat_model_id: String,
    pub summary_config: SummaryConfig,
    pub fallback_response: String,
    pub web_search_enabled: bool,
    /// Prior conversation turns, newest last.
    pub history: Vec<Message>,
    pub search_result: Vec<SearchResult>,
    pub rerank_result: Vec<SearchResult>,
    pub merge_result: Vec<SearchResult>,
    pub chat_messages: Vec<ChatMessage>,
    /// Dedicated per-request bus; swapped temporarily by the stream filter.
    pub event_bus: Option<Arc<EventBus>>,
    /// Cooperative cancellation for the owning request.
    pub cancel: CancelToken,
}

pub type PluginOutcome = Result<(), PluginError>;

/// Continuation handle: runs the remaining plugins of the current stage.
pub struct Next {
    plugins: Arc<Vec<Arc<dyn Plugin>>>,
    index: usize,
    stage: PipelineStage,
}

impl Next {
    pub fn run<'a>(
        self,
        chat: &'a mut ChatManage,
    ) -> Pin<Box<dyn Future<Output = PluginOutcome> + Send + 'a>> {
        Box::pin(async move {
            if self.index >= self.plugins.len() {
                return Ok(());
            }
            let plugin = Arc::clone(&self.plugins[self.index]);
            let next = Next {
                plugins: self.plugins,
                index: self.index + 1,
                stage: self.stage,
            };
            plugin.on_event(self.stage, chat, next).await
        })
    }
}

/// A pipeline plugin: declares the stages it activates on and handles them,
/// deciding whether to continue the chain via `next`.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn activation_stages(&self) -> Vec<PipelineStage>;

    async fn on_event(
        &self,
        stage: PipelineStage,
        chat: &mut ChatManage,
        next: Next,
    ) -> PluginOutcome;
}

/// Routes stage triggers through the registered plugins.
#[derive(Default)]
pub struct EventManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Chain order within a stage follows registration
    /// order.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Trigger one stage: all matching plugins run as a chain.
    pub async fn trigger(&self, stage: PipelineStage, chat: &mut ChatManage) -> PluginOutcome {
        let matching: Arc<Vec<Arc<dyn Plugin>>> = Arc::new(
            self.plugins
                .iter()
                .filter(|p| p.activation_stages().contains(&stage))
                .cloned()
                .collect(),
        );
        debug!(
            target: "pipeline",
            stage = stage.as_str(),
            plugins = matching.len(),
            "Triggering stage"
        );
        let chain = Next { plugins: matching, index: 0, stage };
        chain.run(chat).await
    }

    /// Run a stage list in order, stopping at the first error.
    pub async fn run_stages(
        &self,
        stages: &[PipelineStage],
        chat: &mut ChatManage,
    ) -> PluginOutcome {
        for stage in stages {
            self.trigger(*stage, chat).await?;
            info!(
                target: "pipeline",
                stage = stage.as_str(),
                session_id = %chat.session_id,
                "Stage completed"
            );
        }
        Ok(())
    }
}
