//! LLM access layer: the `ChatModel` and `Reranker` contracts plus the
//! OpenAI-compatible HTTP implementations used in production.

mod client;
mod rerank;

pub use client::{LlmClientConfig, OpenAiChatModel};
pub use rerank::HttpReranker;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{ChatMessage, FunctionDefinition, ToolCallRecord};
use crate::Result;

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub seed: Option<u64>,
    /// Some backends expose a reasoning toggle; `None` keeps the default.
    pub thinking: Option<bool>,
}

/// Non-streaming completion result.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
}

/// One delta from a streaming completion.
///
/// `reasoning` carries "thinking" tokens where the backend separates them;
/// assembled tool calls arrive on the final chunk together with
/// `done = true`.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub done: bool,
}

/// Chat model contract. Implemented by the HTTP client and by test mocks.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> String;

    async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatResponse>;

    /// Streaming completion with optional tool exposure. The receiver yields
    /// deltas in generation order and closes after the `done` chunk.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDefinition],
        opts: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>>;
}

/// Resolves model ids to clients. The model registry itself is external;
/// deployments provide their own lookup, tests and single-model setups use
/// [`StaticModelProvider`].
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat_model(&self, model_id: &str) -> Result<std::sync::Arc<dyn ChatModel>>;
    async fn reranker(&self, model_id: &str) -> Result<std::sync::Arc<dyn Reranker>>;
}

/// Serves the same chat model (and optional reranker) for every id.
pub struct StaticModelProvider {
    chat: std::sync::Arc<dyn ChatModel>,
    rerank: Option<std::sync::Arc<dyn Reranker>>,
}

impl StaticModelProvider {
    pub fn new(
        chat: std::sync::Arc<dyn ChatModel>,
        rerank: Option<std::sync::Arc<dyn Reranker>>,
    ) -> Self {
        Self { chat, rerank }
    }
}

#[async_trait]
impl ModelProvider for StaticModelProvider {
    async fn chat_model(&self, _model_id: &str) -> Result<std::sync::Arc<dyn ChatModel>> {
        Ok(std::sync::Arc::clone(&self.chat))
    }

    async fn reranker(&self, model_id: &str) -> Result<std::sync::Arc<dyn Reranker>> {
        self.rerank
            .as_ref()
            .map(std::sync::Arc::clone)
            .ok_or_else(|| crate::WeKnoraError::NotFound(format!("rerank model {model_id}")))
    }
}

/// Second-pass relevance score for one passage.
#[derive(Debug, Clone)]
pub struct RerankScore {
    pub index: usize,
    pub relevance_score: f64,
}

/// Rerank model contract: maps `(query, passages)` to scores in `[0, 1]`.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn model_name(&self) -> String;

    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<RerankScore>>;
}
