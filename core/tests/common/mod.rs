// Shared test doubles for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use weknora_core::llm::{
    ChatModel, ChatOptions, ChatResponse, RerankScore, Reranker, StreamChunk,
};
use weknora_core::search::RetrievalBackend;
use weknora_core::storage::{ChunkStore, KnowledgeBaseCatalog};
use weknora_core::types::{
    ChatMessage, Chunk, FunctionDefinition, KnowledgeBaseInfo, MatchType, SearchParams,
    SearchResult, ToolCallRecord,
};
use weknora_core::{Result, WeKnoraError};

/// Builds a `SearchResult` with the fields the tests care about.
pub fn search_result(id: &str, kb: &str, score: f64, match_type: MatchType) -> SearchResult {
    SearchResult {
        id: id.to_string(),
        content: format!("content of {id}"),
        knowledge_id: format!("doc-{id}"),
        knowledge_base_id: kb.to_string(),
        knowledge_title: format!("Title {id}"),
        chunk_index: 0,
        score,
        match_type,
        metadata: Default::default(),
    }
}

/// Scripted chat model: every `chat_stream` call pops the next script entry
/// and plays its chunks; `chat` pops and joins the content.
pub struct ScriptedChatModel {
    scripts: Mutex<VecDeque<Vec<StreamChunk>>>,
    /// When the script runs out, this chunk list is replayed.
    default_chunks: Vec<StreamChunk>,
    pub calls: Mutex<usize>,
}

impl ScriptedChatModel {
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            default_chunks: vec![text_chunk("done"), done_chunk()],
            calls: Mutex::new(0),
        }
    }

    pub fn with_default(mut self, chunks: Vec<StreamChunk>) -> Self {
        self.default_chunks = chunks;
        self
    }

    fn next_script(&self) -> Vec<StreamChunk> {
        *self.calls.lock().unwrap() += 1;
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_chunks.clone())
    }
}

pub fn text_chunk(content: &str) -> StreamChunk {
    StreamChunk { content: content.to_string(), ..Default::default() }
}

pub fn reasoning_chunk(reasoning: &str) -> StreamChunk {
    StreamChunk { reasoning: reasoning.to_string(), ..Default::default() }
}

pub fn done_chunk() -> StreamChunk {
    StreamChunk { done: true, ..Default::default() }
}

pub fn tool_call_chunk(name: &str, arguments: serde_json::Value) -> StreamChunk {
    StreamChunk {
        done: true,
        tool_calls: vec![ToolCallRecord { name: name.to_string(), arguments }],
        ..Default::default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn model_name(&self) -> String {
        "scripted".to_string()
    }

    async fn chat(&self, _messages: &[ChatMessage], _opts: &ChatOptions) -> Result<ChatResponse> {
        let content = self
            .next_script()
            .into_iter()
            .map(|c| c.content)
            .collect::<String>();
        Ok(ChatResponse { content })
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: &[FunctionDefinition],
        _opts: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let chunks = self.next_script();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// Chat model that always fails.
pub struct FailingChatModel;

#[async_trait]
impl ChatModel for FailingChatModel {
    fn model_name(&self) -> String {
        "failing".to_string()
    }

    async fn chat(&self, _messages: &[ChatMessage], _opts: &ChatOptions) -> Result<ChatResponse> {
        Err(WeKnoraError::External("model unavailable".to_string()))
    }

    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _tools: &[FunctionDefinition],
        _opts: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        Err(WeKnoraError::External("model unavailable".to_string()))
    }
}

/// Retrieval backend serving a fixed result set per knowledge base.
#[derive(Default)]
pub struct FixtureBackend {
    pub by_kb: HashMap<String, Vec<SearchResult>>,
    /// KB ids that fail instead of returning hits.
    pub failing_kbs: Vec<String>,
}

impl FixtureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(mut self, kb: &str, results: Vec<SearchResult>) -> Self {
        self.by_kb.insert(kb.to_string(), results);
        self
    }

    pub fn with_failing_kb(mut self, kb: &str) -> Self {
        self.failing_kbs.push(kb.to_string());
        self
    }
}

#[async_trait]
impl RetrievalBackend for FixtureBackend {
    async fn hybrid_search(
        &self,
        kb_id: &str,
        _params: SearchParams,
    ) -> Result<Vec<SearchResult>> {
        if self.failing_kbs.iter().any(|kb| kb == kb_id) {
            return Err(WeKnoraError::External(format!("kb {kb_id} unavailable")));
        }
        Ok(self.by_kb.get(kb_id).cloned().unwrap_or_default())
    }
}

/// Reranker assigning a fixed score per chunk id.
pub struct FixtureReranker {
    pub scores: HashMap<String, f64>,
    pub fail: bool,
}

impl FixtureReranker {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self { scores: HashMap::new(), fail: true }
    }
}

#[async_trait]
impl Reranker for FixtureReranker {
    fn model_name(&self) -> String {
        "fixture-rerank".to_string()
    }

    async fn rerank(&self, _query: &str, passages: &[String]) -> Result<Vec<RerankScore>> {
        if self.fail {
            return Err(WeKnoraError::External("rerank unavailable".to_string()));
        }
        Ok(passages
            .iter()
            .enumerate()
            .map(|(index, passage)| {
                // Passages look like "content of {id}".
                let id = passage.rsplit(' ').next().unwrap_or_default();
                RerankScore {
                    index,
                    relevance_score: self.scores.get(id).copied().unwrap_or(0.5),
                }
            })
            .collect())
    }
}

/// Catalog with a fixed KB listing.
pub struct FixtureCatalog {
    pub kbs: Vec<KnowledgeBaseInfo>,
}

impl FixtureCatalog {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            kbs: ids
                .iter()
                .map(|id| KnowledgeBaseInfo {
                    id: id.to_string(),
                    name: format!("KB {id}"),
                    description: String::new(),
                    recent_documents: Vec::new(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl KnowledgeBaseCatalog for FixtureCatalog {
    async fn list_knowledge_bases(&self, _tenant_id: u64) -> Result<Vec<KnowledgeBaseInfo>> {
        Ok(self.kbs.clone())
    }

    async fn get_knowledge_base(&self, kb_id: &str) -> Result<Option<KnowledgeBaseInfo>> {
        Ok(self.kbs.iter().find(|kb| kb.id == kb_id).cloned())
    }
}

/// Chunk store over a fixed document layout.
pub struct FixtureChunkStore {
    pub chunks: Vec<Chunk>,
}

impl FixtureChunkStore {
    /// One document `knowledge_id` with `count` sequential chunks.
    pub fn sequential(knowledge_id: &str, kb_id: &str, count: i32) -> Self {
        Self {
            chunks: (0..count)
                .map(|i| Chunk {
                    id: format!("{knowledge_id}-c{i}"),
                    knowledge_id: knowledge_id.to_string(),
                    knowledge_base_id: kb_id.to_string(),
                    content: format!("chunk {i} of {knowledge_id}"),
                    chunk_index: i,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ChunkStore for FixtureChunkStore {
    async fn get_chunk_by_id(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(self.chunks.iter().find(|c| c.id == chunk_id).cloned())
    }

    async fn list_chunks_by_knowledge_id(&self, knowledge_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .chunks
            .iter()
            .filter(|c| c.knowledge_id == knowledge_id)
            .cloned()
            .collect())
    }
}

/// Collects frames/events emitted on a bus for assertions.
pub struct EventRecorder {
    pub events: Arc<Mutex<Vec<weknora_core::event::Event>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self { events: Arc::new(Mutex::new(Vec::new())) }
    }

    pub async fn subscribe_all(&self, bus: &weknora_core::event::EventBus) {
        use weknora_core::event::EventKind::*;
        for kind in [
            AgentQuery,
            AgentThought,
            AgentToolCall,
            AgentToolResult,
            AgentReferences,
            AgentFinalAnswer,
            AgentReflection,
            AgentComplete,
            SessionTitle,
            Error,
            Stop,
        ] {
            let events = Arc::clone(&self.events);
            bus.on(kind, move |event| {
                let events = Arc::clone(&events);
                async move {
                    events.lock().unwrap().push(event);
                    Ok(())
                }
            })
            .await;
        }
    }

    pub fn kinds(&self) -> Vec<weknora_core::event::EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }
}
