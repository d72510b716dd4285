//! Per-session LLM context with pluggable compression.
//!
//! Independent from the persisted message table: this is the working memory
//! handed to the model, bounded by a token budget.

mod strategy;

pub use strategy::{CompressionStrategy, SlidingWindowStrategy, SmartCompressionStrategy};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{ChatMessage, ContextStats};
use crate::Result;

struct SessionContext {
    messages: Vec<ChatMessage>,
    is_compressed: bool,
    original_message_count: usize,
}

impl SessionContext {
    fn new() -> Self {
        Self { messages: Vec::new(), is_compressed: false, original_message_count: 0 }
    }
}

/// Session-scoped message history. Mutations take the session write lock;
/// reads return copies so callers cannot mutate shared state in place.
pub struct ContextManager {
    sessions: RwLock<HashMap<String, Arc<RwLock<SessionContext>>>>,
    strategy: Arc<dyn CompressionStrategy>,
    max_tokens: usize,
}

impl ContextManager {
    pub fn new(strategy: Arc<dyn CompressionStrategy>, max_tokens: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), strategy, max_tokens }
    }

    async fn session(&self, session_id: &str) -> Arc<RwLock<SessionContext>> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SessionContext::new())))
            .clone()
    }

    /// Append a message, compressing whenever the token estimate exceeds
    /// the budget.
    pub async fn add_message(&self, session_id: &str, message: ChatMessage) -> Result<()> {
        let session = self.session(session_id).await;
        let mut ctx = session.write().await;

        ctx.messages.push(message);
        ctx.original_message_count += 1;

        let token_count = self.strategy.estimate_tokens(&ctx.messages);
        debug!(
            target: "context_manager",
            session_id = %session_id,
            messages = ctx.messages.len(),
            tokens = token_count,
            max_tokens = self.max_tokens,
            "Message added to context"
        );

        if token_count > self.max_tokens {
            let before = ctx.messages.len();
            let compressed =
                self.strategy.compress(ctx.messages.clone(), self.max_tokens).await?;
            if compressed.len() != before {
                ctx.is_compressed = true;
            }
            info!(
                target: "context_manager",
                session_id = %session_id,
                before,
                after = compressed.len(),
                "Context compressed"
            );
            ctx.messages = compressed;
        }
        Ok(())
    }

    /// Copy of the current context.
    pub async fn get_context(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let session = self.session(session_id).await;
        let ctx = session.read().await;
        Ok(ctx.messages.clone())
    }

    pub async fn clear_context(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(session_id).is_some() {
            info!(target: "context_manager", session_id = %session_id, "Context cleared");
        }
        Ok(())
    }

    pub async fn get_context_stats(&self, session_id: &str) -> Result<ContextStats> {
        let session = self.session(session_id).await;
        let ctx = session.read().await;
        Ok(ContextStats {
            message_count: ctx.messages.len(),
            token_count: self.strategy.estimate_tokens(&ctx.messages),
            is_compressed: ctx.is_compressed,
            original_message_count: ctx.original_message_count,
        })
    }
}
