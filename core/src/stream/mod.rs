//! Stream Store
//!
//! Append-only event log per `(session, message)` with replace-by-id
//! coalescing, offset-based reads for resumable clients, and bounded
//! retention after completion.

mod memory;

pub use memory::MemoryStreamStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{SearchResult, StreamEvent};
use crate::Result;

/// Snapshot of one stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub session_id: String,
    pub message_id: String,
    pub query: String,
    pub events: Vec<StreamEvent>,
    pub knowledge_references: Vec<SearchResult>,
    pub last_updated: DateTime<Utc>,
    pub is_completed: bool,
}

/// Persisted event log for in-flight and recently completed answers.
///
/// Invariants:
/// - events are observed in append order by all readers;
/// - `replace_event` updates in place for a known id, appends otherwise;
/// - once a stream is completed the event sequence no longer changes, and
///   it always contains a terminal event (`complete`, or an `answer` with
///   `done = true`);
/// - completed streams are retained for at least the configured retention
///   window before being reclaimed.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Register a new stream for `(session_id, message_id)`.
    async fn register_stream(
        &self,
        session_id: &str,
        message_id: &str,
        query: &str,
    ) -> Result<()>;

    /// Append an event to the stream.
    async fn append_event(
        &self,
        session_id: &str,
        message_id: &str,
        event: StreamEvent,
    ) -> Result<()>;

    /// Replace the event carrying `event.id`, appending if unseen. Used for
    /// token-by-token progress under one logical event id.
    async fn replace_event(
        &self,
        session_id: &str,
        message_id: &str,
        event: StreamEvent,
    ) -> Result<()>;

    /// Update the knowledge references side-slot.
    async fn update_references(
        &self,
        session_id: &str,
        message_id: &str,
        references: Vec<SearchResult>,
    ) -> Result<()>;

    /// Mark the stream completed and schedule reclamation.
    async fn complete_stream(&self, session_id: &str, message_id: &str) -> Result<()>;

    /// Full snapshot, or `None` for an unknown stream.
    async fn get_stream(&self, session_id: &str, message_id: &str) -> Result<Option<StreamInfo>>;

    /// Events at index `>= from_offset` plus the new offset. The returned
    /// offset never moves backwards.
    async fn get_events(
        &self,
        session_id: &str,
        message_id: &str,
        from_offset: usize,
    ) -> Result<(Vec<StreamEvent>, usize)>;
}
