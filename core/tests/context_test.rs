mod common;

use std::sync::Arc;

use common::{done_chunk, text_chunk, FailingChatModel, ScriptedChatModel};
use weknora_core::context::{
    CompressionStrategy, ContextManager, SlidingWindowStrategy, SmartCompressionStrategy,
};
use weknora_core::types::{ChatMessage, Role};

/// Context bound: after add_message either the estimate fits the budget or
/// compression shrank the list to at most `system + window` messages.
#[tokio::test]
async fn context_stays_bounded_under_load() {
    let window = 4;
    let max_tokens = 50; // 200 chars
    let strategy = Arc::new(SlidingWindowStrategy::new(window));
    let manager = ContextManager::new(strategy.clone(), max_tokens);

    manager
        .add_message("s1", ChatMessage::system("always keep the rules"))
        .await
        .unwrap();
    for i in 0..30 {
        manager
            .add_message("s1", ChatMessage::user(format!("user message number {i} padding")))
            .await
            .unwrap();
    }

    let context = manager.get_context("s1").await.unwrap();
    let tokens = strategy.estimate_tokens(&context);
    let system_count = context.iter().filter(|m| m.role == Role::System).count();
    assert!(
        tokens <= max_tokens || context.len() <= system_count + window,
        "context must fit the budget or be window-bounded (got {} messages / {} tokens)",
        context.len(),
        tokens
    );
}

/// Sliding-window invariant: system messages keep their relative order and
/// the last N non-system messages survive.
#[tokio::test]
async fn sliding_window_preserves_system_and_recent() {
    let strategy = SlidingWindowStrategy::new(3);
    let messages = vec![
        ChatMessage::system("rule A"),
        ChatMessage::user("old 1"),
        ChatMessage::system("rule B"),
        ChatMessage::user("old 2"),
        ChatMessage::user("recent 1"),
        ChatMessage::assistant("recent 2"),
        ChatMessage::user("recent 3"),
    ];

    let out = strategy.compress(messages, 10).await.unwrap();
    let contents: Vec<&str> = out.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["rule A", "rule B", "recent 1", "recent 2", "recent 3"]
    );
}

#[tokio::test]
async fn get_context_returns_a_copy() {
    let manager = ContextManager::new(Arc::new(SlidingWindowStrategy::new(10)), 1000);
    manager.add_message("s1", ChatMessage::user("hello")).await.unwrap();

    let mut copy = manager.get_context("s1").await.unwrap();
    copy.push(ChatMessage::user("mutated"));

    assert_eq!(manager.get_context("s1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn smart_compression_summarizes_old_messages() {
    let chat_model = Arc::new(ScriptedChatModel::new(vec![vec![
        text_chunk("users discussed database tuning"),
        done_chunk(),
    ]]));
    let strategy = SmartCompressionStrategy::new(2, chat_model, 3);

    let messages: Vec<ChatMessage> = (0..8)
        .map(|i| ChatMessage::user(format!("turn {i}")))
        .collect();
    let out = strategy.compress(messages, 10).await.unwrap();

    // Summary message + the last two turns.
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].role, Role::System);
    assert!(out[0]
        .content
        .starts_with("[Previous conversation summary]:"));
    assert!(out[0].content.contains("database tuning"));
    assert_eq!(out[1].content, "turn 6");
    assert_eq!(out[2].content, "turn 7");
}

#[tokio::test]
async fn smart_compression_falls_back_on_llm_failure() {
    let strategy = SmartCompressionStrategy::new(2, Arc::new(FailingChatModel), 3);

    let messages: Vec<ChatMessage> = (0..8)
        .map(|i| ChatMessage::user(format!("turn {i}")))
        .collect();
    let out = strategy.compress(messages, 10).await.unwrap();

    // Sliding-window behavior: only the recent turns remain.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].content, "turn 6");
    assert_eq!(out[1].content, "turn 7");
}

#[tokio::test]
async fn stats_track_compression_and_clear() {
    let manager = ContextManager::new(Arc::new(SlidingWindowStrategy::new(2)), 10);

    manager
        .add_message("s1", ChatMessage::user("a".repeat(30)))
        .await
        .unwrap();
    let stats = manager.get_context_stats("s1").await.unwrap();
    assert!(!stats.is_compressed);

    for _ in 0..5 {
        manager
            .add_message("s1", ChatMessage::user("b".repeat(30)))
            .await
            .unwrap();
    }
    let stats = manager.get_context_stats("s1").await.unwrap();
    assert!(stats.is_compressed);
    assert!(stats.message_count <= 2);
    assert!(stats.original_message_count >= 6);

    manager.clear_context("s1").await.unwrap();
    let stats = manager.get_context_stats("s1").await.unwrap();
    assert_eq!(stats.message_count, 0);
    assert!(!stats.is_compressed);
}
