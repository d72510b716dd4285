// Application state: the wired collaborator set shared by every handler.
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use weknora_core::config::Config;
use weknora_core::context::{ContextManager, SlidingWindowStrategy};
use weknora_core::llm::ModelProvider;
use weknora_core::mcp::McpClient;
use weknora_core::pipeline::{
    EventManager, PluginChatCompletionStream, PluginFilterTopK, PluginIntoChatMessage,
    PluginMerge, PluginPreprocess, PluginRerank, PluginSearch, PluginStreamFilter,
};
use weknora_core::providers::{KvStore, MemoryKvStore, WebSearchProvider};
use weknora_core::search::{HybridSearcher, RetrievalBackend};
use weknora_core::storage::{
    ChunkStore, KnowledgeBaseCatalog, MemoryMessageStore, MemorySessionStore, MessageStore,
    SessionStore, SqlExecutor,
};
use weknora_core::stream::{MemoryStreamStore, StreamStore};
use weknora_core::tools::{
    register_mcp_tools, DatabaseQueryTool, GetDocumentInfoTool, GetRelatedChunksTool,
    GraphBackend, KnowledgeSearchTool, QueryKnowledgeGraphTool, ThinkingTool, TodoWriteTool,
    ToolRegistry,
};
use weknora_core::types::{KnowledgeBaseInfo, SearchParams, SearchResult};

/// Everything a request handler needs, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub stream_store: Arc<dyn StreamStore>,
    pub context_manager: Arc<ContextManager>,
    pub models: Arc<dyn ModelProvider>,
    pub retrieval: Arc<dyn RetrievalBackend>,
    pub catalog: Arc<dyn KnowledgeBaseCatalog>,
    pub registry: Arc<ToolRegistry>,
    pub event_manager: Arc<EventManager>,
    pub kv: Arc<dyn KvStore>,
    pub chunks: Option<Arc<dyn ChunkStore>>,
}

/// External collaborators that must be provided when building the state.
pub struct Backends {
    pub models: Arc<dyn ModelProvider>,
    pub retrieval: Arc<dyn RetrievalBackend>,
    pub catalog: Arc<dyn KnowledgeBaseCatalog>,
    pub web_search: Option<Arc<dyn WebSearchProvider>>,
    pub kv: Arc<dyn KvStore>,
    pub chunks: Option<Arc<dyn ChunkStore>>,
    pub sql: Option<Arc<dyn SqlExecutor>>,
    pub graph: Option<Arc<dyn GraphBackend>>,
    /// Connected MCP services; their tools register at startup under
    /// `mcp_{service}_{tool}` names.
    pub mcp_clients: Vec<Arc<dyn McpClient>>,
}

impl AppState {
    /// Wire the state from config + backends: register the pipeline
    /// plugins, the built-in tools, and the tools of every connected MCP
    /// service.
    pub async fn new(config: Config, backends: Backends) -> Self {
        let stream_store: Arc<dyn StreamStore> =
            Arc::new(MemoryStreamStore::new(config.stream.retention()));
        let context_manager = Arc::new(ContextManager::new(
            Arc::new(SlidingWindowStrategy::new(config.context.window_size)),
            config.context.max_tokens,
        ));

        // The stream filter registers ahead of the completion stream so its
        // temporary bus wraps the model stream.
        let mut event_manager = EventManager::new();
        event_manager.register(Arc::new(PluginPreprocess::new(
            Arc::clone(&backends.models),
            config.conversation.enable_rewrite,
        )));
        event_manager.register(Arc::new(PluginSearch::new(
            Arc::clone(&backends.retrieval),
            backends.web_search.clone(),
            Arc::clone(&backends.kv),
        )));
        event_manager.register(Arc::new(PluginRerank::new(Arc::clone(&backends.models))));
        event_manager.register(Arc::new(PluginMerge::new()));
        event_manager.register(Arc::new(PluginFilterTopK::new()));
        event_manager.register(Arc::new(PluginIntoChatMessage::new()));
        event_manager.register(Arc::new(PluginStreamFilter::new()));
        event_manager.register(Arc::new(PluginChatCompletionStream::new(Arc::clone(
            &backends.models,
        ))));

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ThinkingTool::new()));
        registry.register(Arc::new(TodoWriteTool::new()));
        registry.register(Arc::new(GetDocumentInfoTool::new(Arc::clone(&backends.catalog))));
        if let Some(sql) = &backends.sql {
            registry.register(Arc::new(DatabaseQueryTool::new(Arc::clone(sql))));
        }
        if let Some(graph) = &backends.graph {
            registry.register(Arc::new(QueryKnowledgeGraphTool::new(Arc::clone(graph))));
        }
        register_mcp_tools(&registry, &backends.mcp_clients).await;

        Self {
            config: Arc::new(config),
            sessions: Arc::new(MemorySessionStore::new()),
            messages: Arc::new(MemoryMessageStore::new()),
            stream_store,
            context_manager,
            models: backends.models,
            retrieval: backends.retrieval,
            catalog: backends.catalog,
            registry,
            event_manager: Arc::new(event_manager),
            kv: backends.kv,
            chunks: backends.chunks,
        }
    }

    /// Register the retrieval-backed tools for a request's knowledge bases.
    /// knowledge_search and get_related_chunks depend on the per-request KB
    /// scope and rerank model, so they are (re)registered with the allowed
    /// set before each agent run.
    pub async fn register_search_tools(&self, allowed_kbs: Vec<String>, rerank_model_id: &str) {
        let reranker = if rerank_model_id.is_empty() {
            None
        } else {
            match self.models.reranker(rerank_model_id).await {
                Ok(reranker) => Some(reranker),
                Err(e) => {
                    // Rerank stays off for this request; retrieval scores
                    // are used directly.
                    warn!(target: "server", error = %e, "Rerank model unavailable");
                    None
                }
            }
        };

        let searcher = Arc::new(HybridSearcher::new(Arc::clone(&self.retrieval), reranker));
        self.registry.register(Arc::new(KnowledgeSearchTool::new(
            Arc::clone(&searcher),
            allowed_kbs,
        )));
        if let Some(chunks) = &self.chunks {
            self.registry
                .register(Arc::new(GetRelatedChunksTool::new(Arc::clone(chunks), searcher)));
        }
    }
}

/// Retrieval backend that serves nothing. Default for a freshly started
/// server with no index wired; real deployments replace it.
pub struct UnconfiguredRetrieval;

#[async_trait]
impl RetrievalBackend for UnconfiguredRetrieval {
    async fn hybrid_search(
        &self,
        kb_id: &str,
        _params: SearchParams,
    ) -> weknora_core::Result<Vec<SearchResult>> {
        warn!(target: "retrieval", kb_id = %kb_id, "No retrieval backend configured");
        Ok(Vec::new())
    }
}

/// In-memory knowledge-base catalog.
#[derive(Default)]
pub struct MemoryKbCatalog {
    kbs: DashMap<String, KnowledgeBaseInfo>,
}

impl MemoryKbCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kb: KnowledgeBaseInfo) {
        self.kbs.insert(kb.id.clone(), kb);
    }
}

#[async_trait]
impl KnowledgeBaseCatalog for MemoryKbCatalog {
    async fn list_knowledge_bases(
        &self,
        _tenant_id: u64,
    ) -> weknora_core::Result<Vec<KnowledgeBaseInfo>> {
        Ok(self.kbs.iter().map(|kb| kb.clone()).collect())
    }

    async fn get_knowledge_base(
        &self,
        kb_id: &str,
    ) -> weknora_core::Result<Option<KnowledgeBaseInfo>> {
        Ok(self.kbs.get(kb_id).map(|kb| kb.clone()))
    }
}

/// Default KV store re-export for the binary.
pub fn default_kv() -> Arc<dyn KvStore> {
    Arc::new(MemoryKvStore::new())
}
