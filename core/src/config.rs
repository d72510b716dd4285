//! Configuration surface for the orchestration runtime.
//!
//! Defaults follow the documented retrieval and streaming knobs; a TOML file
//! (`weknora.toml` by default) can override any section. Model credentials
//! come from the environment, never from the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, WeKnoraError};

/// Retrieval and conversation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Minimum score for vector (embedding) hits.
    pub vector_threshold: f64,
    /// Minimum score for keyword hits.
    pub keyword_threshold: f64,
    /// Absolute floor applied after rerank.
    pub min_score: f64,
    /// Results per knowledge base per query.
    pub embedding_top_k: usize,
    pub rerank_top_k: usize,
    pub rerank_threshold: f64,
    /// Canned answer returned when retrieval yields nothing.
    pub fallback_response: String,
    /// Prefix marking a "no answer found" model response.
    pub no_match_prefix: String,
    /// Prompt used for generating session titles.
    pub title_prompt: String,
    /// Prompt template for the RAG answer stage. `{context}` and `{query}`
    /// placeholders are substituted at message-assembly time.
    pub summary_prompt: String,
    pub enable_rewrite: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            vector_threshold: 0.6,
            keyword_threshold: 0.5,
            min_score: 0.3,
            embedding_top_k: 5,
            rerank_top_k: 10,
            rerank_threshold: 0.5,
            fallback_response: "I don't know based on the knowledge base.".to_string(),
            no_match_prefix: String::new(),
            title_prompt: "Generate a short title (at most 10 words) for a conversation \
                           that starts with the following user message. Reply with the \
                           title only."
                .to_string(),
            summary_prompt: "You are a helpful assistant. Answer the question using only \
                             the provided context. If the context does not contain the \
                             answer, say you do not know."
                .to_string(),
            enable_rewrite: true,
        }
    }
}

/// Context-manager defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextManagerConfig {
    pub max_tokens: usize,
    pub window_size: usize,
    /// Old-message count before the smart strategy summarizes.
    pub summarize_threshold: usize,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self { max_tokens: 8192, window_size: 20, summarize_threshold: 5 }
    }
}

/// Stream store / SSE pacing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Poll cadence for resumable readers, in milliseconds.
    pub poll_interval_ms: u64,
    /// Retention past stream completion, in seconds. Must stay >= 30.
    pub retention_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 100, retention_secs: 30 }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub conversation: ConversationConfig,
    pub context: ContextManagerConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load from a TOML file, falling back to defaults when the file does
    /// not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(target: "config", path = %path.display(), "Config file missing, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&raw)
            .map_err(|e| WeKnoraError::InvalidArgument(format!("bad config file: {e}")))?;
        if cfg.stream.retention_secs < 30 {
            tracing::warn!(
                target: "config",
                retention_secs = cfg.stream.retention_secs,
                "Stream retention below the 30s floor, clamping"
            );
            cfg.stream.retention_secs = 30;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let cfg = Config::default();
        assert_eq!(cfg.conversation.vector_threshold, 0.6);
        assert_eq!(cfg.conversation.keyword_threshold, 0.5);
        assert_eq!(cfg.conversation.min_score, 0.3);
        assert_eq!(cfg.conversation.embedding_top_k, 5);
        assert_eq!(cfg.context.max_tokens, 8192);
        assert_eq!(cfg.context.window_size, 20);
        assert_eq!(cfg.stream.poll_interval(), Duration::from_millis(100));
        assert!(cfg.stream.retention() >= Duration::from_secs(30));
    }

    #[test]
    fn load_clamps_retention_floor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weknora.toml");
        std::fs::write(&path, "[stream]\nretention_secs = 5\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.stream.retention_secs, 30);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load("/definitely/not/here.toml").unwrap();
        assert_eq!(cfg.server.port, 8080);
    }
}
