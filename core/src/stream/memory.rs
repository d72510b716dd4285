// In-memory stream store.
//
// Vec + id->index side map per stream: appends stay O(1) and replace-by-id
// finds its slot without scanning. Readers use offsets, so they never
// coordinate with writers beyond the per-map lock.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{StreamInfo, StreamStore};
use crate::types::{ResponseType, SearchResult, StreamEvent};
use crate::Result;

struct StreamEntry {
    query: String,
    events: Vec<StreamEvent>,
    index_by_id: HashMap<String, usize>,
    knowledge_references: Vec<SearchResult>,
    last_updated: chrono::DateTime<Utc>,
    is_completed: bool,
}

impl StreamEntry {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            events: Vec::new(),
            index_by_id: HashMap::new(),
            knowledge_references: Vec::new(),
            last_updated: Utc::now(),
            is_completed: false,
        }
    }

    fn has_terminal_event(&self) -> bool {
        self.events.iter().any(|e| {
            matches!(e.event_type, ResponseType::Complete)
                || (matches!(e.event_type, ResponseType::Answer) && e.done)
        })
    }
}

type StreamKey = (String, String);

/// Memory-backed [`StreamStore`] with delayed reclamation of completed
/// streams.
pub struct MemoryStreamStore {
    streams: Arc<RwLock<HashMap<StreamKey, StreamEntry>>>,
    retention: Duration,
}

impl MemoryStreamStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            // 30s floor so refreshing clients can still replay a finished answer
            retention: retention.max(Duration::from_secs(30)),
        }
    }

    fn key(session_id: &str, message_id: &str) -> StreamKey {
        (session_id.to_string(), message_id.to_string())
    }

    /// Number of live streams (including completed ones awaiting
    /// reclamation).
    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn register_stream(&self, session_id: &str, message_id: &str, query: &str) -> Result<()> {
        let mut streams = self.streams.write().await;
        streams.insert(Self::key(session_id, message_id), StreamEntry::new(query));
        debug!(
            target: "stream_store",
            session_id = %session_id,
            message_id = %message_id,
            "Stream registered"
        );
        Ok(())
    }

    async fn append_event(
        &self,
        session_id: &str,
        message_id: &str,
        event: StreamEvent,
    ) -> Result<()> {
        let mut streams = self.streams.write().await;
        if let Some(entry) = streams.get_mut(&Self::key(session_id, message_id)) {
            if entry.is_completed {
                warn!(
                    target: "stream_store",
                    session_id = %session_id,
                    message_id = %message_id,
                    event_type = ?event.event_type,
                    "Dropping event appended after stream completion"
                );
                return Ok(());
            }
            entry.index_by_id.insert(event.id.clone(), entry.events.len());
            entry.events.push(event);
            entry.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn replace_event(
        &self,
        session_id: &str,
        message_id: &str,
        event: StreamEvent,
    ) -> Result<()> {
        let mut streams = self.streams.write().await;
        if let Some(entry) = streams.get_mut(&Self::key(session_id, message_id)) {
            if entry.is_completed {
                return Ok(());
            }
            match entry.index_by_id.get(&event.id) {
                Some(&idx) => entry.events[idx] = event,
                None => {
                    entry.index_by_id.insert(event.id.clone(), entry.events.len());
                    entry.events.push(event);
                }
            }
            entry.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn update_references(
        &self,
        session_id: &str,
        message_id: &str,
        references: Vec<SearchResult>,
    ) -> Result<()> {
        let mut streams = self.streams.write().await;
        if let Some(entry) = streams.get_mut(&Self::key(session_id, message_id)) {
            entry.knowledge_references = references;
            entry.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn complete_stream(&self, session_id: &str, message_id: &str) -> Result<()> {
        let key = Self::key(session_id, message_id);
        {
            let mut streams = self.streams.write().await;
            let Some(entry) = streams.get_mut(&key) else {
                return Ok(());
            };
            if entry.is_completed {
                return Ok(());
            }
            // Clients resuming after completion must always observe a
            // terminal event.
            if !entry.has_terminal_event() {
                let terminal =
                    StreamEvent::new(format!("{message_id}-complete"), ResponseType::Complete, "")
                        .done(true);
                entry.index_by_id.insert(terminal.id.clone(), entry.events.len());
                entry.events.push(terminal);
            }
            entry.is_completed = true;
            entry.last_updated = Utc::now();
        }

        // Reclaim after the retention window.
        let streams = Arc::clone(&self.streams);
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            streams.write().await.remove(&key);
            debug!(
                target: "stream_store",
                session_id = %key.0,
                message_id = %key.1,
                "Completed stream reclaimed"
            );
        });
        Ok(())
    }

    async fn get_stream(&self, session_id: &str, message_id: &str) -> Result<Option<StreamInfo>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&Self::key(session_id, message_id)).map(|entry| StreamInfo {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            query: entry.query.clone(),
            events: entry.events.clone(),
            knowledge_references: entry.knowledge_references.clone(),
            last_updated: entry.last_updated,
            is_completed: entry.is_completed,
        }))
    }

    async fn get_events(
        &self,
        session_id: &str,
        message_id: &str,
        from_offset: usize,
    ) -> Result<(Vec<StreamEvent>, usize)> {
        let streams = self.streams.read().await;
        let Some(entry) = streams.get(&Self::key(session_id, message_id)) else {
            return Ok((Vec::new(), from_offset));
        };
        let new_offset = entry.events.len().max(from_offset);
        let events = if from_offset < entry.events.len() {
            entry.events[from_offset..].to_vec()
        } else {
            Vec::new()
        };
        Ok((events, new_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(id: &str, t: ResponseType, content: &str, done: bool) -> StreamEvent {
        StreamEvent::new(id, t, content).done(done)
    }

    #[tokio::test]
    async fn replace_updates_in_place_and_appends_when_unseen() {
        let store = MemoryStreamStore::default();
        store.register_stream("s1", "m1", "q").await.unwrap();

        store
            .replace_event("s1", "m1", evt("think-1", ResponseType::Thinking, "he", false))
            .await
            .unwrap();
        store
            .append_event("s1", "m1", evt("tc-1", ResponseType::ToolCall, "call", false))
            .await
            .unwrap();
        store
            .replace_event("s1", "m1", evt("think-1", ResponseType::Thinking, "hello", true))
            .await
            .unwrap();

        let (events, offset) = store.get_events("s1", "m1", 0).await.unwrap();
        assert_eq!(offset, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content, "hello");
        assert!(events[0].done);
        assert_eq!(events[1].id, "tc-1");
    }

    #[tokio::test]
    async fn offsets_are_monotonic() {
        let store = MemoryStreamStore::default();
        store.register_stream("s1", "m1", "q").await.unwrap();
        for i in 0..5 {
            store
                .append_event(
                    "s1",
                    "m1",
                    evt(&format!("e{i}"), ResponseType::Answer, "x", false),
                )
                .await
                .unwrap();
        }
        let (first, a) = store.get_events("s1", "m1", 0).await.unwrap();
        let (rest, b) = store.get_events("s1", "m1", 3).await.unwrap();
        assert_eq!(a, 5);
        assert_eq!(b, 5);
        assert_eq!(rest.len(), 2);
        assert_eq!(first[3].id, rest[0].id);

        // Reading past the head keeps the caller's offset.
        let (none, c) = store.get_events("s1", "m1", 9).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(c, 9);
    }

    #[tokio::test]
    async fn complete_appends_terminal_and_freezes_stream() {
        let store = MemoryStreamStore::default();
        store.register_stream("s1", "m1", "q").await.unwrap();
        store
            .append_event("s1", "m1", evt("a1", ResponseType::Answer, "partial", false))
            .await
            .unwrap();
        store.complete_stream("s1", "m1").await.unwrap();

        let info = store.get_stream("s1", "m1").await.unwrap().unwrap();
        assert!(info.is_completed);
        assert!(matches!(
            info.events.last().unwrap().event_type,
            ResponseType::Complete
        ));

        // Nothing after completion changes the sequence.
        let before = info.events.len();
        store
            .append_event("s1", "m1", evt("late", ResponseType::ToolCall, "late", false))
            .await
            .unwrap();
        let info = store.get_stream("s1", "m1").await.unwrap().unwrap();
        assert_eq!(info.events.len(), before);
    }

    #[tokio::test]
    async fn unknown_stream_reads_are_empty() {
        let store = MemoryStreamStore::default();
        let (events, offset) = store.get_events("nope", "m", 2).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(offset, 2);
        assert!(store.get_stream("nope", "m").await.unwrap().is_none());
    }
}
