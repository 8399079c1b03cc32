//! Chat backends. Grounded in
//! `original_source/packages/llm/olympus_llm/providers.py`'s `LLMProvider`
//! ABC and its `OllamaProvider`: a `POST {base_url}/api/chat` call with a
//! JSON body of `model`/`messages`/`stream`/`options`, and a response
//! parsed through a fallback chain (`message.content`, then
//! `choices[0].message.content`, then bare `response`) since different
//! local servers speak slightly different dialects of the same shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::RouterError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "ChatRequest::default_temperature")]
    pub temperature: f64,
    #[serde(default = "ChatRequest::default_max_tokens")]
    pub max_tokens: u32,
}

impl ChatRequest {
    fn default_temperature() -> f64 {
        0.2
    }
    fn default_max_tokens() -> u32 {
        1024
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    /// Estimated from word count when a backend doesn't report usage,
    /// following the original's heuristic of treating whitespace-split
    /// tokens as a stand-in for true tokenizer counts.
    pub tokens_used: u64,
    pub cost_usd: f64,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RouterError>;

    /// Same contract as `chat`, delivered as an ordered, finite sequence of
    /// chunks instead of one accumulated string. Backends that can't stream
    /// natively may fall back to a single-chunk sequence.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<Vec<String>, RouterError>;
}

const CONNECT_TIMEOUT_SEC: u64 = 5;
const REQUEST_TIMEOUT_SEC: u64 = 120;

fn extract_content(body: &serde_json::Value) -> Option<String> {
    body.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| body.get("choices").and_then(|c| c.get(0)).and_then(|c| c.get("message")).and_then(|m| m.get("content")).and_then(|c| c.as_str()))
        .or_else(|| body.get("response").and_then(|r| r.as_str()))
        .map(str::to_string)
}

fn estimate_tokens(messages: &[ChatMessage], content: &str) -> u64 {
    let prompt_words: usize = messages.iter().map(|m| m.content.split_whitespace().count()).sum();
    (prompt_words + content.split_whitespace().count()) as u64
}

/// Ollama-style backend: `POST {base_url}/api/chat`.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        OllamaBackend {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SEC))
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SEC))
                .build()
                .expect("reqwest client configuration is valid"),
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RouterError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": { "temperature": request.temperature, "num_predict": request.max_tokens },
        });
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| RouterError::Backend(e.to_string()))?;
        let parsed: serde_json::Value = response.json().await.map_err(|e| RouterError::Backend(e.to_string()))?;
        let content = extract_content(&parsed).ok_or_else(|| RouterError::Backend("backend response missing content".to_string()))?;
        let tokens_used = estimate_tokens(&request.messages, &content);
        Ok(ChatResponse { content, tokens_used, cost_usd: 0.0 })
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<Vec<String>, RouterError> {
        // The chat endpoint is called with `stream: false` above; until a
        // real SSE/NDJSON reader is wired up, the full response stands in
        // as a single-chunk sequence.
        Ok(vec![self.chat(request).await?.content])
    }
}

/// llama.cpp-style backend: same JSON shape, different base URL/port
/// convention, selected via `LLM_BACKEND=llamacpp`.
pub struct LlamaCppBackend {
    base_url: String,
    client: reqwest::Client,
}

impl LlamaCppBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        LlamaCppBackend {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SEC))
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SEC))
                .build()
                .expect("reqwest client configuration is valid"),
        }
    }
}

#[async_trait]
impl ChatBackend for LlamaCppBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RouterError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let response = self.client.post(&url).json(&body).send().await.map_err(|e| RouterError::Backend(e.to_string()))?;
        let parsed: serde_json::Value = response.json().await.map_err(|e| RouterError::Backend(e.to_string()))?;
        let content = extract_content(&parsed).ok_or_else(|| RouterError::Backend("backend response missing content".to_string()))?;
        let tokens_used = estimate_tokens(&request.messages, &content);
        Ok(ChatResponse { content, tokens_used, cost_usd: 0.0 })
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<Vec<String>, RouterError> {
        Ok(vec![self.chat(request).await?.content])
    }
}

/// Deterministic `test://stub` backend for the testable properties
/// spec.md §8 requires: no network, same input always yields the same
/// output.
pub struct StubBackend;

#[async_trait]
impl ChatBackend for StubBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RouterError> {
        let content = "stub-response".to_string();
        let tokens_used = estimate_tokens(&request.messages, &content);
        Ok(ChatResponse { content, tokens_used, cost_usd: 0.0 })
    }

    async fn stream_chat(&self, _request: &ChatRequest) -> Result<Vec<String>, RouterError> {
        Ok(vec!["hello".to_string(), "world".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_backend_is_deterministic() {
        let request = ChatRequest {
            model: "test".into(),
            messages: vec![ChatMessage { role: "user".into(), content: "ping".into() }],
            temperature: 0.0,
            max_tokens: 16,
        };
        let a = StubBackend.chat(&request).await.unwrap();
        let b = StubBackend.chat(&request).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.content, "stub-response");
    }

    #[tokio::test]
    async fn stub_backend_streams_hello_world() {
        let request = ChatRequest {
            model: "test".into(),
            messages: vec![ChatMessage { role: "user".into(), content: "ping".into() }],
            temperature: 0.0,
            max_tokens: 16,
        };
        let chunks = StubBackend.stream_chat(&request).await.unwrap();
        assert_eq!(chunks, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn extract_content_falls_back_through_shapes() {
        assert_eq!(extract_content(&json!({"message": {"content": "a"}})), Some("a".to_string()));
        assert_eq!(extract_content(&json!({"choices": [{"message": {"content": "b"}}]})), Some("b".to_string()));
        assert_eq!(extract_content(&json!({"response": "c"})), Some("c".to_string()));
        assert_eq!(extract_content(&json!({})), None);
    }
}
