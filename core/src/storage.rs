//! Session/message persistence and the opaque collaborator contracts the
//! tools depend on (knowledge catalog, chunk lookup, SQL access).
//!
//! The in-memory implementations back tests and single-node deployments;
//! production deployments swap in database-backed ones.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::{Chunk, KnowledgeBaseInfo, Message, Session};
use crate::{Result, WeKnoraError};

/// Session CRUD, tenant-scoped.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<Session>;
    async fn get(&self, tenant_id: u64, id: &str) -> Result<Option<Session>>;
    async fn update(&self, session: &Session) -> Result<()>;
    async fn list_by_tenant(&self, tenant_id: u64) -> Result<Vec<Session>>;
}

/// Message persistence for one session.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: Message) -> Result<Message>;
    async fn get(&self, session_id: &str, id: &str) -> Result<Option<Message>>;
    async fn update(&self, message: &Message) -> Result<()>;
    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn first_user_message(&self, session_id: &str) -> Result<Option<Message>>;
}

/// Knowledge-base catalog: what KBs a tenant can see, with recent documents
/// for prompt assembly.
#[async_trait]
pub trait KnowledgeBaseCatalog: Send + Sync {
    async fn list_knowledge_bases(&self, tenant_id: u64) -> Result<Vec<KnowledgeBaseInfo>>;
    async fn get_knowledge_base(&self, kb_id: &str) -> Result<Option<KnowledgeBaseInfo>>;
}

/// Chunk lookup for the related-chunks tool.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get_chunk_by_id(&self, chunk_id: &str) -> Result<Option<Chunk>>;
    async fn list_chunks_by_knowledge_id(&self, knowledge_id: &str) -> Result<Vec<Chunk>>;
}

/// Read-only SQL access for the database-query tool. Implementations run
/// the statement and return JSON rows; tenant scoping is enforced by the
/// tool before this is called.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn query(&self, sql: &str) -> Result<serde_json::Value>;
}

/// DashMap-backed [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, mut session: Session) -> Result<Session> {
        if session.tenant_id == 0 {
            return Err(WeKnoraError::Unauthorized("tenant id is required".to_string()));
        }
        if session.id.is_empty() {
            session.id = uuid::Uuid::new_v4().to_string();
        }
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, tenant_id: u64, id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .get(id)
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.clone()))
    }

    async fn update(&self, session: &Session) -> Result<()> {
        match self.sessions.get_mut(&session.id) {
            Some(mut entry) => {
                *entry = session.clone();
                Ok(())
            }
            None => Err(WeKnoraError::NotFound(format!("session {}", session.id))),
        }
    }

    async fn list_by_tenant(&self, tenant_id: u64) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .map(|s| s.clone())
            .collect())
    }
}

/// DashMap-backed [`MessageStore`].
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: DashMap<String, Message>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, mut message: Message) -> Result<Message> {
        if message.id.is_empty() {
            message.id = uuid::Uuid::new_v4().to_string();
        }
        self.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn get(&self, session_id: &str, id: &str) -> Result<Option<Message>> {
        Ok(self
            .messages
            .get(id)
            .filter(|m| m.session_id == session_id)
            .map(|m| m.clone()))
    }

    async fn update(&self, message: &Message) -> Result<()> {
        match self.messages.get_mut(&message.id) {
            Some(mut entry) => {
                *entry = message.clone();
                Ok(())
            }
            None => Err(WeKnoraError::NotFound(format!("message {}", message.id))),
        }
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .map(|m| m.clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn first_user_message(&self, session_id: &str) -> Result<Option<Message>> {
        let messages = self.list_by_session(session_id).await?;
        Ok(messages
            .into_iter()
            .find(|m| matches!(m.role, crate::types::Role::User)))
    }
}
