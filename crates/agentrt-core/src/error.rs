//! Error taxonomy shared across the runtime (spec.md §7).
//!
//! One flat enum, one variant per failure mode, `thiserror`-derived
//! `Display`. This mirrors `csa-core::error::AppError`: no nested error
//! trees, no `source()` chains — the retry controller and API layer both
//! match on the variant directly.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("symlink forbidden in sandbox path: {0}")]
    SymlinkForbidden(String),

    #[error("consent required for scope '{0}'")]
    ConsentRequired(String),

    #[error("consent denied for scope '{0}'")]
    ConsentDenied(String),

    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("daily budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("model '{0}' is not in the allow-list")]
    ModelNotAllowed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency cycle detected: {0}")]
    CyclicPlan(String),

    #[error("unknown step reference '{0}'")]
    UnknownStepReference(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("store error: {0}")]
    Store(String),
}

impl AppError {
    /// Whether this error kind is retryable under a Step's Guard.
    /// `Timeout` is treated as `ToolFailed` per spec.md §7.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ToolFailed(_) | AppError::Timeout(_))
    }
}
