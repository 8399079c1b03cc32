//! LLM Router (spec.md §4.6): model allow-listing, daily budget
//! enforcement, and a deterministic response cache in front of a
//! pluggable chat backend.
//!
//! Grounded in `original_source/packages/llm/olympus_llm/router.py`'s
//! `LLMRouter`: config-driven provider selection, `ModelNotAllowedError`,
//! and an in-memory cache keyed by `f"{model}-{temp}-{max_tokens}-
//! {messages}"`. The rewrite persists the cache through the Durable
//! Store instead of an in-process dict, and uses a SHA-256 digest of the
//! same fields rather than a raw string key.

use std::sync::Arc;

use agentrt_core::CacheItem;
use agentrt_config::{Config, LlmBackend as ConfiguredBackend};
use agentrt_store::Store;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::backend::{ChatBackend, ChatRequest, ChatResponse, LlamaCppBackend, OllamaBackend, StubBackend};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("model '{0}' is not in the allow-list")]
    ModelNotAllowed(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("budget bookkeeping error: {0}")]
    Budget(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl From<RouterError> for agentrt_core::AppError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::ModelNotAllowed(m) => agentrt_core::AppError::ModelNotAllowed(m),
            RouterError::BudgetExceeded(m) => agentrt_core::AppError::BudgetExceeded(m),
            other => agentrt_core::AppError::ToolFailed(other.to_string()),
        }
    }
}

pub struct LlmRouter {
    backend: Box<dyn ChatBackend>,
    store: Arc<Store>,
    model_allowlist: Vec<String>,
    daily_usd_budget: Option<f64>,
    daily_token_budget: Option<u64>,
    cache_ttl_ms: i64,
}

impl LlmRouter {
    pub fn new(backend: Box<dyn ChatBackend>, store: Arc<Store>, config: &Config) -> Self {
        LlmRouter {
            backend,
            store,
            model_allowlist: config.model_allowlist.clone(),
            daily_usd_budget: config.daily_usd_budget,
            daily_token_budget: config.daily_token_budget,
            cache_ttl_ms: config.llm_cache_ttl_ms as i64,
        }
    }

    /// Build a router whose backend is chosen from `config.llm_backend`,
    /// reading the matching base-URL environment variable (`OLLAMA_BASE_URL`
    /// / `LLAMA_CPP_URL`) with the original's local-first defaults.
    pub fn from_config(store: Arc<Store>, config: &Config) -> Self {
        let backend: Box<dyn ChatBackend> = match config.llm_backend {
            ConfiguredBackend::Ollama => {
                let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
                Box::new(OllamaBackend::new(base_url))
            }
            ConfiguredBackend::LlamaCpp => {
                let base_url = std::env::var("LLAMA_CPP_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
                Box::new(LlamaCppBackend::new(base_url))
            }
            ConfiguredBackend::Stub => Box::new(StubBackend),
        };
        Self::new(backend, store, config)
    }

    /// Projected token usage for an as-yet-unserved request, per spec.md
    /// §4.6: `len(prompt)/4` input plus `max_tokens` output ceiling.
    fn projected_tokens(request: &ChatRequest) -> u64 {
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        (prompt_chars / 4) as u64 + request.max_tokens as u64
    }

    fn cache_key(request: &ChatRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.model.as_bytes());
        hasher.update(request.temperature.to_le_bytes());
        hasher.update(request.max_tokens.to_le_bytes());
        for message in &request.messages {
            hasher.update(message.role.as_bytes());
            hasher.update(message.content.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub async fn chat(&self, request: ChatRequest, now: i64) -> Result<ChatResponse, RouterError> {
        if !self.model_allowlist.is_empty() && !self.model_allowlist.contains(&request.model) {
            return Err(RouterError::ModelNotAllowed(request.model));
        }

        let key = Self::cache_key(&request);
        if let Some(item) = self.store.cache_get(&key, now).map_err(|e| RouterError::Cache(e.to_string()))? {
            let cached: ChatResponse = serde_json::from_str(&item.value).map_err(|e| RouterError::Cache(e.to_string()))?;
            return Ok(cached);
        }

        crate::budget::check(&self.store, self.daily_token_budget, self.daily_usd_budget, Self::projected_tokens(&request), now)?;

        let response = self.backend.chat(&request).await?;

        crate::budget::record(&self.store, response.tokens_used, response.cost_usd, now)?;

        let serialized = serde_json::to_string(&response).map_err(|e| RouterError::Cache(e.to_string()))?;
        self.store
            .cache_put(&CacheItem {
                key,
                value: serialized,
                metadata: serde_json::json!({ "model": response_model_hint(&request) }),
                created_at: now,
                expires_at: Some(now + self.cache_ttl_ms),
            })
            .map_err(|e| RouterError::Cache(e.to_string()))?;

        Ok(response)
    }

    /// Same policy pipeline as `chat` (allow-list, cache, budget) but
    /// returns the backend's chunk sequence instead of one accumulated
    /// string. Cached and budgeted under a distinct key namespace so a
    /// `chat` and `stream_chat` call over identical messages don't collide.
    pub async fn stream_chat(&self, request: ChatRequest, now: i64) -> Result<Vec<String>, RouterError> {
        if !self.model_allowlist.is_empty() && !self.model_allowlist.contains(&request.model) {
            return Err(RouterError::ModelNotAllowed(request.model));
        }

        let key = format!("stream:{}", Self::cache_key(&request));
        if let Some(item) = self.store.cache_get(&key, now).map_err(|e| RouterError::Cache(e.to_string()))? {
            let cached: Vec<String> = serde_json::from_str(&item.value).map_err(|e| RouterError::Cache(e.to_string()))?;
            return Ok(cached);
        }

        crate::budget::check(&self.store, self.daily_token_budget, self.daily_usd_budget, Self::projected_tokens(&request), now)?;

        let chunks = self.backend.stream_chat(&request).await?;

        let prompt_words: usize = request.messages.iter().map(|m| m.content.split_whitespace().count()).sum();
        let output_words: usize = chunks.iter().map(|c| c.split_whitespace().count()).sum();
        crate::budget::record(&self.store, (prompt_words + output_words) as u64, 0.0, now)?;

        let serialized = serde_json::to_string(&chunks).map_err(|e| RouterError::Cache(e.to_string()))?;
        self.store
            .cache_put(&CacheItem {
                key,
                value: serialized,
                metadata: serde_json::json!({ "model": response_model_hint(&request) }),
                created_at: now,
                expires_at: Some(now + self.cache_ttl_ms),
            })
            .map_err(|e| RouterError::Cache(e.to_string()))?;

        Ok(chunks)
    }
}

fn response_model_hint(request: &ChatRequest) -> &str {
    &request.model
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatMessage;

    fn router_with_stub(store: Arc<Store>, allowlist: Vec<String>) -> LlmRouter {
        let config = Config {
            sandbox_root: "/tmp".into(),
            require_consent: true,
            auto_consent: false,
            exec_concurrency: 4,
            db_path: "/tmp/agentrt.db".into(),
            llm_backend: ConfiguredBackend::Stub,
            model_allowlist: allowlist,
            daily_usd_budget: None,
            daily_token_budget: None,
            llm_cache_ttl_ms: 60_000,
        };
        LlmRouter::from_config(store, &config)
    }

    fn request(model: &str, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage { role: "user".into(), content: prompt.to_string() }],
            temperature: 0.0,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn rejects_model_outside_allowlist() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = router_with_stub(store, vec!["llama3".to_string()]);
        let err = router.chat(request("gpt-ghost", "hi"), 0).await.unwrap_err();
        assert!(matches!(err, RouterError::ModelNotAllowed(_)));
    }

    #[tokio::test]
    async fn allows_model_in_allowlist() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = router_with_stub(store, vec!["llama3".to_string()]);
        let response = router.chat(request("llama3", "hi"), 0).await.unwrap();
        assert_eq!(response.content, "stub-response");
    }

    #[tokio::test]
    async fn empty_allowlist_allows_any_model() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = router_with_stub(store, vec![]);
        assert!(router.chat(request("anything", "hi"), 0).await.is_ok());
    }

    #[tokio::test]
    async fn identical_requests_hit_the_cache() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = router_with_stub(store.clone(), vec![]);
        let first = router.chat(request("llama3", "ping"), 0).await.unwrap();
        let second = router.chat(request("llama3", "ping"), 10).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn stream_chat_yields_hello_world_from_the_stub() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = router_with_stub(store, vec![]);
        let chunks = router.stream_chat(request("llama3", "hi"), 0).await.unwrap();
        assert_eq!(chunks, vec!["hello".to_string(), "world".to_string()]);
    }

    #[tokio::test]
    async fn stream_chat_respects_the_model_allowlist() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = router_with_stub(store, vec!["llama3".to_string()]);
        let err = router.stream_chat(request("gpt-ghost", "hi"), 0).await.unwrap_err();
        assert!(matches!(err, RouterError::ModelNotAllowed(_)));
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Config {
            sandbox_root: "/tmp".into(),
            require_consent: true,
            auto_consent: false,
            exec_concurrency: 4,
            db_path: "/tmp/agentrt.db".into(),
            llm_backend: ConfiguredBackend::Stub,
            model_allowlist: vec![],
            daily_usd_budget: None,
            daily_token_budget: None,
            llm_cache_ttl_ms: 1_000,
        };
        let router = LlmRouter::from_config(store, &config);
        router.chat(request("llama3", "ping"), 0).await.unwrap();

        let key = LlmRouter::cache_key(&request("llama3", "ping"));
        assert!(router.store.cache_get(&key, 0).unwrap().is_some());
        assert!(router.store.cache_get(&key, 2_000).unwrap().is_none());
    }

    #[tokio::test]
    async fn first_request_of_the_day_is_rejected_when_its_own_projection_exceeds_the_token_budget() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Config {
            sandbox_root: "/tmp".into(),
            require_consent: true,
            auto_consent: false,
            exec_concurrency: 4,
            db_path: "/tmp/agentrt.db".into(),
            llm_backend: ConfiguredBackend::Stub,
            model_allowlist: vec![],
            daily_usd_budget: None,
            daily_token_budget: Some(10),
            llm_cache_ttl_ms: 60_000,
        };
        let router = LlmRouter::from_config(store, &config);
        let mut oversized = request("llama3", "hi");
        oversized.max_tokens = 10_000;
        let err = router.chat(oversized, 0).await.unwrap_err();
        assert!(matches!(err, RouterError::BudgetExceeded(_)));
    }
}
