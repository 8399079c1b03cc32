//! LLM Router (spec.md §4.6): model allow-listing, daily budget
//! enforcement, response caching, and pluggable local chat backends.

pub mod backend;
pub mod budget;
pub mod router;

pub use backend::{ChatBackend, ChatMessage, ChatRequest, ChatResponse, LlamaCppBackend, OllamaBackend, StubBackend};
pub use router::{LlmRouter, RouterError};
