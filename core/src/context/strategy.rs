// Compression strategies for the context manager.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::llm::{ChatModel, ChatOptions};
use crate::types::{ChatMessage, Role};
use crate::Result;

/// Token estimation is length-based (roughly 4 chars per token); callers
/// must not rely on a specific tokenizer.
fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.len()).sum::<usize>() / 4
}

/// Polymorphic compression seam: `{compress, estimate_tokens}`.
#[async_trait]
pub trait CompressionStrategy: Send + Sync {
    /// Shrink `messages` towards `max_tokens`. System messages stay
    /// anchored before user/assistant messages.
    async fn compress(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: usize,
    ) -> Result<Vec<ChatMessage>>;

    fn estimate_tokens(&self, messages: &[ChatMessage]) -> usize {
        estimate_tokens(messages)
    }
}

fn split_system(messages: &[ChatMessage]) -> (Vec<ChatMessage>, Vec<ChatMessage>) {
    let mut system = Vec::new();
    let mut other = Vec::new();
    for msg in messages {
        if msg.role == Role::System {
            system.push(msg.clone());
        } else {
            other.push(msg.clone());
        }
    }
    (system, other)
}

/// Keep all system messages plus the last N non-system messages.
/// Deterministic.
pub struct SlidingWindowStrategy {
    window_size: usize,
}

impl SlidingWindowStrategy {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }
}

#[async_trait]
impl CompressionStrategy for SlidingWindowStrategy {
    async fn compress(
        &self,
        messages: Vec<ChatMessage>,
        _max_tokens: usize,
    ) -> Result<Vec<ChatMessage>> {
        if messages.len() <= self.window_size {
            return Ok(messages);
        }

        let (system, other) = split_system(&messages);
        let start = other.len().saturating_sub(self.window_size);

        let mut compressed = system;
        compressed.extend_from_slice(&other[start..]);

        info!(
            target: "context_manager",
            before = messages.len(),
            after = compressed.len(),
            "Sliding window compression applied"
        );
        Ok(compressed)
    }
}

/// Summarize old messages with a chat model, keeping the most recent N
/// intact. Falls back to sliding-window behavior when the model call fails.
pub struct SmartCompressionStrategy {
    recent_count: usize,
    chat_model: Arc<dyn ChatModel>,
    summarize_threshold: usize,
}

impl SmartCompressionStrategy {
    pub fn new(
        recent_count: usize,
        chat_model: Arc<dyn ChatModel>,
        summarize_threshold: usize,
    ) -> Self {
        Self { recent_count, chat_model, summarize_threshold }
    }

    async fn summarize(&self, old: &[ChatMessage]) -> Result<String> {
        let mut conversation = String::new();
        for msg in old {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            conversation.push_str(&format!("{role}: {}\n", msg.content));
        }

        let prompt = vec![
            ChatMessage::system(
                "You are a helpful assistant that summarizes conversation history. \
                 Summarize the following conversation concisely while preserving key \
                 information and context. Keep the summary under 200 words.",
            ),
            ChatMessage::user(conversation),
        ];

        let opts = ChatOptions { temperature: Some(0.3), ..Default::default() };
        let response = self.chat_model.chat(&prompt, &opts).await?;
        Ok(response.content)
    }
}

#[async_trait]
impl CompressionStrategy for SmartCompressionStrategy {
    async fn compress(
        &self,
        messages: Vec<ChatMessage>,
        _max_tokens: usize,
    ) -> Result<Vec<ChatMessage>> {
        if messages.len() <= self.recent_count {
            return Ok(messages);
        }

        let cut = messages.len() - self.recent_count;
        let mut system = Vec::new();
        let mut old = Vec::new();
        let mut recent = Vec::new();
        for (i, msg) in messages.iter().enumerate() {
            if msg.role == Role::System {
                system.push(msg.clone());
            } else if i < cut {
                old.push(msg.clone());
            } else {
                recent.push(msg.clone());
            }
        }

        let mut middle = Vec::new();
        if old.len() >= self.summarize_threshold {
            match self.summarize(&old).await {
                Ok(summary) => {
                    middle.push(ChatMessage::system(format!(
                        "[Previous conversation summary]: {summary}"
                    )));
                    info!(
                        target: "context_manager",
                        summarized = old.len(),
                        "Old messages summarized"
                    );
                }
                Err(e) => {
                    // Sliding-window fallback: old messages are dropped.
                    warn!(
                        target: "context_manager",
                        error = %e,
                        "Summarization failed, falling back to truncation"
                    );
                }
            }
        } else {
            middle = old;
        }

        let mut result = Vec::with_capacity(system.len() + middle.len() + recent.len());
        result.extend(system);
        result.extend(middle);
        result.extend(recent);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(n: usize) -> Vec<ChatMessage> {
        (0..n).map(|i| ChatMessage::user(format!("message {i}"))).collect()
    }

    #[tokio::test]
    async fn sliding_window_keeps_system_and_recent() {
        let strategy = SlidingWindowStrategy::new(3);
        let mut messages = vec![ChatMessage::system("rules")];
        messages.extend(msgs(10));

        let out = strategy.compress(messages, 100).await.unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].content, "message 7");
        assert_eq!(out[3].content, "message 9");
    }

    #[tokio::test]
    async fn sliding_window_noop_under_size() {
        let strategy = SlidingWindowStrategy::new(20);
        let out = strategy.compress(msgs(5), 100).await.unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn token_estimate_is_chars_over_four() {
        let strategy = SlidingWindowStrategy::new(5);
        let messages = vec![ChatMessage::user("x".repeat(40))];
        assert_eq!(strategy.estimate_tokens(&messages), 10);
    }
}
