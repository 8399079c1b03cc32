//! Tool Registry (spec.md §4.4): a name-keyed map of capability
//! implementations plus the consent scope each one requires.
//!
//! Grounded loosely in `csa-mcp-hub::registry::McpRegistry`
//! (`HashMap<String, Entry>` keyed by tool/server name, resolved once per
//! call) — simplified here since dispatch is in-process, not over MCP's
//! stdio/HTTP transports.

use std::collections::HashMap;
use std::sync::Arc;

use agentrt_core::{AppError, CapabilityRef, ConsentScope, ConsentToken};
use async_trait::async_trait;
use serde_json::Value;

/// A single tool implementation behind a capability name like `fs.write`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The capability name this tool answers to, e.g. `"fs.write"`.
    fn name(&self) -> &str;

    /// The consent scope a caller must hold to invoke this tool.
    fn scope(&self) -> ConsentScope;

    async fn call(&self, input: Value, ctx: &ToolContext) -> Result<Value, AppError>;
}

/// Shared context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub sandbox: Arc<agentrt_sandbox::Sandbox>,
    pub http: reqwest::Client,
}

impl ToolContext {
    pub fn new(sandbox: Arc<agentrt_sandbox::Sandbox>) -> Self {
        ToolContext {
            sandbox,
            http: reqwest::Client::new(),
        }
    }
}

/// Name-keyed collection of [`Tool`] implementations.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, AppError> {
        self.tools.get(name).cloned().ok_or_else(|| AppError::UnknownCapability(name.to_string()))
    }

    /// Resolve the named capability, check the caller's consent token
    /// against the tool's required scope, and invoke it.
    pub async fn invoke(&self, capability: &CapabilityRef, input: Value, consent: &ConsentToken, ctx: &ToolContext) -> Result<Value, AppError> {
        let tool = self.resolve(&capability.name)?;
        let scope = tool.scope();
        if !consent.grants(scope) {
            return Err(AppError::ConsentDenied(scope.as_str().to_string()));
        }
        tool.call(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "test.echo"
        }
        fn scope(&self) -> ConsentScope {
            ConsentScope::ReadFs
        }
        async fn call(&self, input: Value, _ctx: &ToolContext) -> Result<Value, AppError> {
            Ok(input)
        }
    }

    fn ctx() -> ToolContext {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(agentrt_sandbox::Sandbox::new(dir.into_path()).unwrap());
        ToolContext::new(sandbox)
    }

    #[test]
    fn resolve_unknown_capability_is_an_error() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("ghost.tool").unwrap_err();
        assert!(matches!(err, AppError::UnknownCapability(_)));
    }

    #[tokio::test]
    async fn invoke_denies_without_matching_scope() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let consent = ConsentToken::new([ConsentScope::WriteFs]);
        let err = registry
            .invoke(&CapabilityRef::new("test.echo"), serde_json::json!({}), &consent, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConsentDenied(_)));
    }

    #[tokio::test]
    async fn invoke_succeeds_with_wildcard_consent() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let consent = ConsentToken::wildcard();
        let out = registry
            .invoke(&CapabilityRef::new("test.echo"), serde_json::json!({"hello": "world"}), &consent, &ctx())
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"hello": "world"}));
    }
}
