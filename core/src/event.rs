// Per-request event bus
//
// Each inbound request owns a dedicated bus, so handlers never need to
// filter by session: every event a handler sees belongs to its request.
// The bus holds no persistent state and is dropped with the request.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use opentelemetry::{
    global,
    metrics::Counter,
    KeyValue,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{AgentStep, SearchResult};
use crate::Result;

/// Event discriminant used for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
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
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentQuery => "agent_query",
            EventKind::AgentThought => "agent_thought",
            EventKind::AgentToolCall => "agent_tool_call",
            EventKind::AgentToolResult => "agent_tool_result",
            EventKind::AgentReferences => "agent_references",
            EventKind::AgentFinalAnswer => "agent_final_answer",
            EventKind::AgentReflection => "agent_reflection",
            EventKind::AgentComplete => "agent_complete",
            EventKind::SessionTitle => "session_title",
            EventKind::Error => "error",
            EventKind::Stop => "stop",
        }
    }
}

/// Typed event payloads.
#[derive(Debug, Clone)]
pub enum EventData {
    AgentQuery {
        session_id: String,
        query: String,
        request_id: String,
    },
    /// Incremental reasoning chunk; `done = true` closes the thought.
    AgentThought { content: String, done: bool },
    AgentToolCall { tool_name: String, arguments: Value },
    AgentToolResult {
        tool_name: String,
        success: bool,
        output: String,
        error: Option<String>,
        duration_ms: u64,
        data: Option<Value>,
    },
    AgentReferences { references: Vec<SearchResult> },
    /// Incremental final-answer chunk.
    AgentFinalAnswer { content: String, done: bool },
    AgentReflection { content: String, done: bool },
    AgentComplete {
        session_id: String,
        message_id: String,
        final_answer: String,
        knowledge_refs: Vec<SearchResult>,
        agent_steps: Vec<AgentStep>,
    },
    SessionTitle { session_id: String, title: String },
    Error {
        error: String,
        stage: String,
        session_id: String,
    },
    Stop {
        session_id: String,
        message_id: String,
        reason: String,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::AgentQuery { .. } => EventKind::AgentQuery,
            EventData::AgentThought { .. } => EventKind::AgentThought,
            EventData::AgentToolCall { .. } => EventKind::AgentToolCall,
            EventData::AgentToolResult { .. } => EventKind::AgentToolResult,
            EventData::AgentReferences { .. } => EventKind::AgentReferences,
            EventData::AgentFinalAnswer { .. } => EventKind::AgentFinalAnswer,
            EventData::AgentReflection { .. } => EventKind::AgentReflection,
            EventData::AgentComplete { .. } => EventKind::AgentComplete,
            EventData::SessionTitle { .. } => EventKind::SessionTitle,
            EventData::Error { .. } => EventKind::Error,
            EventData::Stop { .. } => EventKind::Stop,
        }
    }
}

/// An event flowing through a request's bus.
///
/// `id` is the stable logical-event key: all chunks of one streamed thought
/// or answer share an id, which is what lets the stream store coalesce them.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub session_id: String,
    pub request_id: String,
    pub data: EventData,
}

impl Event {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>, data: EventData) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            request_id: String::new(),
            data,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Per-request publish/subscribe bus.
///
/// Handlers registered for a kind run sequentially in registration order on
/// every `emit`; a failing handler is logged and does not affect the rest.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,

    // OpenTelemetry metrics
    emitted_counter: Counter<u64>,
    handler_errors_counter: Counter<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        let meter = global::meter("weknora.event_bus");

        let emitted_counter = meter
            .u64_counter("weknora.event_bus.emitted_total")
            .with_description("Total number of events emitted")
            .init();

        let handler_errors_counter = meter
            .u64_counter("weknora.event_bus.handler_errors_total")
            .with_description("Total number of handler errors")
            .init();

        Self {
            handlers: RwLock::new(HashMap::new()),
            emitted_counter,
            handler_errors_counter,
        }
    }

    /// Register a handler for an event kind. Handlers fire in registration
    /// order.
    pub async fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers.write().await.entry(kind).or_default().push(handler);
    }

    /// Emit an event, invoking every matching handler in order.
    ///
    /// Returns the number of handlers that ran. Handler errors are logged
    /// and swallowed so one subscriber cannot break another.
    pub async fn emit(&self, event: Event) -> usize {
        let kind = event.kind();

        self.emitted_counter
            .add(1, &[KeyValue::new("kind", kind.as_str())]);

        let handlers: Vec<Handler> = {
            let guard = self.handlers.read().await;
            match guard.get(&kind) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        let mut invoked = 0;
        for handler in handlers {
            invoked += 1;
            if let Err(e) = handler(event.clone()).await {
                self.handler_errors_counter
                    .add(1, &[KeyValue::new("kind", kind.as_str())]);
                warn!(
                    target: "event_bus",
                    kind = kind.as_str(),
                    event_id = %event.id,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
        invoked
    }

    /// Number of handlers registered for a kind.
    pub async fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .await
            .get(&kind)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
