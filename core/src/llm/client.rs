// OpenAI-compatible chat client (non-streaming + SSE streaming with tool
// calls).
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use super::{ChatModel, ChatOptions, ChatResponse, StreamChunk};
use crate::types::{ChatMessage, FunctionDefinition, ToolCallRecord};
use crate::{Result, WeKnoraError};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub request_timeout_ms: u64,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "qwen3:8b".to_string(),
            temperature: 0.7,
            request_timeout_ms: 120_000,
        }
    }
}

impl LlmClientConfig {
    /// Build from environment: `WEKNORA_LLM_BASE_URL`, `WEKNORA_LLM_API_KEY`,
    /// `WEKNORA_LLM_MODEL`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("WEKNORA_LLM_BASE_URL") {
            cfg.base_url = v;
        }
        if let Ok(v) = std::env::var("WEKNORA_LLM_API_KEY") {
            cfg.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("WEKNORA_LLM_MODEL") {
            cfg.model = v;
        }
        cfg
    }
}

/// HTTP chat model speaking the `/chat/completions` dialect.
pub struct OpenAiChatModel {
    pub cfg: LlmClientConfig,
    http: Client,
}

impl OpenAiChatModel {
    pub fn new(cfg: LlmClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| WeKnoraError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { cfg, http })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LlmClientConfig::from_env())
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDefinition],
        opts: &ChatOptions,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.cfg.model,
            "messages": messages,
            "temperature": opts.temperature.unwrap_or(self.cfg.temperature),
            "stream": stream,
        });
        if let Some(max_tokens) = opts.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = opts.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(fp) = opts.frequency_penalty {
            body["frequency_penalty"] = json!(fp);
        }
        if let Some(pp) = opts.presence_penalty {
            body["presence_penalty"] = json!(pp);
        }
        if let Some(seed) = opts.seed {
            body["seed"] = json!(seed);
        }
        if let Some(thinking) = opts.thinking {
            body["enable_thinking"] = json!(thinking);
        }
        if !tools.is_empty() {
            let tool_specs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tool_specs);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .post(self.completions_url())
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .json(body)
            .send()
            .await
            .map_err(|e| WeKnoraError::External(format!("chat request failed: {e}")))?;
        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(WeKnoraError::External(format!(
                "chat completions error: status={status} body={text}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> String {
        self.cfg.model.clone()
    }

    async fn chat(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatResponse> {
        let body = self.build_body(messages, &[], opts, false);
        let resp = self.post(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| WeKnoraError::External(format!("failed to parse chat JSON: {e}")))?;
        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(ChatResponse { content })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDefinition],
        opts: &ChatOptions,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let body = self.build_body(messages, tools, opts, true);
        let resp = self.post(&body).await?;

        let (tx, rx) = mpsc::channel(64);
        let model = self.cfg.model.clone();
        tokio::spawn(async move {
            let byte_stream = resp.bytes_stream();
            tokio::pin!(byte_stream);
            let mut line_buf = String::new();
            let mut assembler = ToolCallAssembler::default();

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(target: "llm_client", model = %model, error = %e, "Stream read failed");
                        break;
                    }
                };
                line_buf.push_str(&String::from_utf8_lossy(&bytes));

                // SSE frames are newline-delimited `data: {...}` lines.
                while let Some(pos) = line_buf.find('\n') {
                    let line = line_buf[..pos].trim().to_string();
                    line_buf.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        let _ = tx
                            .send(StreamChunk {
                                tool_calls: assembler.finish(),
                                done: true,
                                ..Default::default()
                            })
                            .await;
                        return;
                    }
                    let Ok(v) = serde_json::from_str::<Value>(payload) else {
                        debug!(target: "llm_client", line = %payload, "Skipping unparseable stream line");
                        continue;
                    };
                    let delta = &v["choices"][0]["delta"];
                    assembler.push_delta(delta);

                    let content = delta["content"].as_str().unwrap_or_default();
                    let reasoning = delta["reasoning_content"].as_str().unwrap_or_default();
                    if !content.is_empty() || !reasoning.is_empty() {
                        if tx
                            .send(StreamChunk {
                                content: content.to_string(),
                                reasoning: reasoning.to_string(),
                                ..Default::default()
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }

            // Stream ended without the [DONE] marker; still deliver the
            // terminal chunk so consumers can finish.
            let _ = tx
                .send(StreamChunk {
                    tool_calls: assembler.finish(),
                    done: true,
                    ..Default::default()
                })
                .await;
        });

        Ok(rx)
    }
}

/// Reassembles tool-call fragments streamed across deltas.
#[derive(Default)]
struct ToolCallAssembler {
    calls: Vec<(String, String)>, // (name, argument-fragment buffer)
}

impl ToolCallAssembler {
    fn push_delta(&mut self, delta: &Value) {
        let Some(tool_calls) = delta["tool_calls"].as_array() else {
            return;
        };
        for tc in tool_calls {
            let index = tc["index"].as_u64().unwrap_or(0) as usize;
            while self.calls.len() <= index {
                self.calls.push((String::new(), String::new()));
            }
            if let Some(name) = tc["function"]["name"].as_str() {
                self.calls[index].0.push_str(name);
            }
            if let Some(args) = tc["function"]["arguments"].as_str() {
                self.calls[index].1.push_str(args);
            }
        }
    }

    fn finish(self) -> Vec<ToolCallRecord> {
        self.calls
            .into_iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, args)| {
                let arguments = serde_json::from_str(&args).unwrap_or_else(|e| {
                    error!(target: "llm_client", tool = %name, error = %e, "Bad tool-call arguments, using empty object");
                    json!({})
                });
                ToolCallRecord { name, arguments }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_joins_argument_fragments() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push_delta(&json!({
            "tool_calls": [{"index": 0, "function": {"name": "knowledge_search", "arguments": "{\"que"}}]
        }));
        assembler.push_delta(&json!({
            "tool_calls": [{"index": 0, "function": {"arguments": "ry\": \"rust\"}"}}]
        }));
        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "knowledge_search");
        assert_eq!(calls[0].arguments["query"], "rust");
    }

    #[test]
    fn assembler_handles_parallel_calls() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push_delta(&json!({
            "tool_calls": [
                {"index": 0, "function": {"name": "thinking", "arguments": "{}"}},
                {"index": 1, "function": {"name": "knowledge_search", "arguments": "{\"query\":\"a\"}"}}
            ]
        }));
        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name, "knowledge_search");
    }

    #[test]
    fn bad_arguments_fall_back_to_empty_object() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push_delta(&json!({
            "tool_calls": [{"index": 0, "function": {"name": "thinking", "arguments": "{broken"}}]
        }));
        let calls = assembler.finish();
        assert_eq!(calls[0].arguments, json!({}));
    }
}
