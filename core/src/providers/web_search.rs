// Web search contract and the temp-KB compression state.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{MatchType, SearchResult};
use crate::Result;

/// One raw web hit from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Session-scoped temporary knowledge base bookkeeping, persisted as JSON
/// under `tempkb:{session_id}` in the external KV store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempKbState {
    #[serde(rename = "kbID", default)]
    pub kb_id: String,
    #[serde(rename = "knowledgeIDs", default)]
    pub knowledge_ids: Vec<String>,
    #[serde(rename = "seenURLs", default)]
    pub seen_urls: HashMap<String, bool>,
}

/// KV key for a session's temp-KB state.
pub fn temp_kb_key(session_id: &str) -> String {
    format!("tempkb:{session_id}")
}

/// Web search collaborator. Providers run searches and, optionally,
/// compress raw hits by ingesting them into a session-scoped temporary KB
/// and retrieving only the passages relevant to the questions.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn name(&self) -> String;

    async fn search(&self, query: &str) -> Result<Vec<WebSearchResult>>;

    /// Returns compressed results plus the updated temp-KB state. Callers
    /// fall back to the raw results on error.
    async fn compress_with_rag(
        &self,
        session_id: &str,
        state: TempKbState,
        questions: &[String],
        results: Vec<WebSearchResult>,
    ) -> Result<(Vec<WebSearchResult>, TempKbState)>;
}

/// Convert web hits to [`SearchResult`]s. Web results carry a fixed
/// medium-relevance score and the URL doubles as the chunk id.
pub fn convert_web_results(web_results: &[WebSearchResult]) -> Vec<SearchResult> {
    web_results
        .iter()
        .enumerate()
        .map(|(i, web)| {
            let id = if web.url.is_empty() {
                format!("web_search_{i}")
            } else {
                web.url.clone()
            };

            let mut content = web.title.clone();
            for part in [&web.snippet, &web.content] {
                if !part.is_empty() {
                    if !content.is_empty() {
                        content.push_str("\n\n");
                    }
                    content.push_str(part);
                }
            }

            let mut metadata = HashMap::new();
            metadata.insert("url".to_string(), web.url.clone());
            metadata.insert("source".to_string(), web.source.clone());
            metadata.insert("title".to_string(), web.title.clone());
            metadata.insert("snippet".to_string(), web.snippet.clone());
            if let Some(published) = web.published_at {
                metadata.insert("published_at".to_string(), published.to_rfc3339());
            }

            SearchResult {
                id,
                content,
                knowledge_id: String::new(),
                knowledge_base_id: String::new(),
                knowledge_title: web.title.clone(),
                chunk_index: i as i32,
                score: 0.6,
                match_type: MatchType::Web,
                metadata,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_results_convert_with_fixed_score() {
        let web = vec![WebSearchResult {
            title: "Rust".to_string(),
            url: "https://example.com/rust".to_string(),
            snippet: "A systems language".to_string(),
            content: String::new(),
            source: "example".to_string(),
            published_at: None,
        }];
        let results = convert_web_results(&web);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "https://example.com/rust");
        assert_eq!(results[0].score, 0.6);
        assert_eq!(results[0].match_type, MatchType::Web);
        assert!(results[0].content.contains("Rust"));
        assert!(results[0].content.contains("A systems language"));
    }

    #[test]
    fn temp_kb_state_round_trips_wire_names() {
        let mut state = TempKbState::default();
        state.kb_id = "kb-tmp".to_string();
        state.seen_urls.insert("u".to_string(), true);
        let raw = serde_json::to_string(&state).unwrap();
        assert!(raw.contains("kbID"));
        assert!(raw.contains("seenURLs"));
        let parsed: TempKbState = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.kb_id, "kb-tmp");
    }
}
