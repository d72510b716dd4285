// HTTP rerank client for Jina/Cohere-style `/rerank` endpoints.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{RerankScore, Reranker};
use crate::{Result, WeKnoraError};

pub struct HttpReranker {
    base_url: String,
    api_key: Option<String>,
    model: String,
    http: Client,
}

impl HttpReranker {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WeKnoraError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            http,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn model_name(&self) -> String {
        self.model.clone()
    }

    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<RerankScore>> {
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "query": query,
            "documents": passages,
        });

        let mut req = self.http.post(&url).header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| WeKnoraError::External(format!("rerank request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(WeKnoraError::External(format!(
                "rerank error: status={status} body={text}"
            )));
        }
        let v: Value = resp
            .json()
            .await
            .map_err(|e| WeKnoraError::External(format!("failed to parse rerank JSON: {e}")))?;

        let results = v["results"]
            .as_array()
            .ok_or_else(|| WeKnoraError::External("rerank response missing results".to_string()))?;

        let scores: Vec<RerankScore> = results
            .iter()
            .filter_map(|r| {
                let index = r["index"].as_u64()? as usize;
                let relevance_score = r["relevance_score"].as_f64()?;
                Some(RerankScore { index, relevance_score })
            })
            .collect();

        debug!(
            target: "rerank",
            model = %self.model,
            passages = passages.len(),
            scored = scores.len(),
            "Rerank completed"
        );
        Ok(scores)
    }
}
