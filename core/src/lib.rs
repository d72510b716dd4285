// WeKnora Core Library
// Event-driven orchestration runtime for retrieval-augmented question answering

pub mod agent;
pub mod config;
pub mod context;
pub mod event;
pub mod llm;
pub mod mcp; // Model Context Protocol contracts and tool adapters
pub mod pipeline; // Plugin-based RAG pipeline
pub mod providers; // External collaborator contracts (web search, KV store)
pub mod search;
pub mod storage;
pub mod stream; // Per-message event log with resumable reads
pub mod telemetry;
pub mod tools;
pub mod types;

// Export core types
pub use agent::AgentEngine;
pub use config::Config;
pub use event::{Event, EventBus, EventData, EventKind};
pub use pipeline::{ChatManage, EventManager, PipelineStage, Plugin, PluginError};
pub use search::{HybridSearchRequest, HybridSearcher, RetrievalBackend};
pub use stream::{MemoryStreamStore, StreamStore};
pub use tools::{Tool, ToolContext, ToolRegistry};
pub use types::{
    AgentConfig, AgentStep, CancelToken, ChatMessage, Message, ResponseType, SearchResult, Session,
    StreamEvent, StreamFrame,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeKnoraError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no knowledge base available: {0}")]
    NoKnowledgeBase(String),

    /// Sentinel: retrieval produced nothing. Resolved into the configured
    /// fallback response by the session layer, never surfaced to users.
    #[error("search returned no results")]
    SearchNothing,

    #[error("external call failed: {0}")]
    External(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeKnoraError>;
