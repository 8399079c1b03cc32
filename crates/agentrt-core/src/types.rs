//! Core data model: Plan, Step, Guard, Event, CacheItem, and the consent
//! vocabulary they all refer to.
//!
//! These types are intentionally dumb containers — no behavior beyond
//! state-transition validation lives here. The scheduler, store, and tool
//! registry all share this shape rather than each crate inventing its own.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::ids::new_id;

/// Lifecycle states of a Plan (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanState {
    Draft,
    Queued,
    Running,
    Paused,
    Done,
    Failed,
    Cancelled,
}

impl PlanState {
    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, next),
            (Draft, Queued)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Paused)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

/// Lifecycle states of a Step (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Blocked,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Done | StepState::Failed | StepState::Skipped)
    }
}

/// Consent scopes a tool invocation may require (spec.md §4.5).
///
/// Extends the original's five-variant set (READ_FS, WRITE_FS, NET_GET,
/// NET_POST, EXEC_CODE) with the scopes the built-in catalog needs
/// (DELETE_FS, LIST_FS, SEARCH_FS, GIT_OPS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentScope {
    ReadFs,
    WriteFs,
    DeleteFs,
    ListFs,
    SearchFs,
    ExecShell,
    GitOps,
    NetGet,
    NetPost,
    ExecCode,
}

impl ConsentScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentScope::ReadFs => "read_fs",
            ConsentScope::WriteFs => "write_fs",
            ConsentScope::DeleteFs => "delete_fs",
            ConsentScope::ListFs => "list_fs",
            ConsentScope::SearchFs => "search_fs",
            ConsentScope::ExecShell => "exec_shell",
            ConsentScope::GitOps => "git_ops",
            ConsentScope::NetGet => "net_get",
            ConsentScope::NetPost => "net_post",
            ConsentScope::ExecCode => "exec_code",
        }
    }
}

/// A bearer token granting a set of consent scopes, or the `"*"` wildcard
/// granting all scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentToken {
    pub token: String,
    scopes: HashSet<String>,
}

impl ConsentToken {
    pub fn new(scopes: impl IntoIterator<Item = ConsentScope>) -> Self {
        ConsentToken {
            token: new_id(),
            scopes: scopes.into_iter().map(|s| s.as_str().to_string()).collect(),
        }
    }

    pub fn wildcard() -> Self {
        ConsentToken {
            token: new_id(),
            scopes: ["*".to_string()].into_iter().collect(),
        }
    }

    pub fn grants(&self, scope: ConsentScope) -> bool {
        self.scopes.contains("*") || self.scopes.contains(scope.as_str())
    }
}

/// A reference to a tool capability a Step's action invokes, e.g. `fs.write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub name: String,
}

impl CapabilityRef {
    pub fn new(name: impl Into<String>) -> Self {
        CapabilityRef { name: name.into() }
    }
}

/// Retry/timeout/budget policy attached to a Step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guard {
    #[serde(default)]
    pub consent_required: bool,
    #[serde(default = "Guard::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "Guard::default_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "Guard::default_jitter_ms")]
    pub retry_backoff_jitter_ms: u64,
    pub deadline_ms: Option<u64>,
    pub token_budget: Option<u64>,
    pub cost_budget_usd: Option<f64>,
}

impl Guard {
    fn default_max_retries() -> u32 {
        3
    }
    fn default_backoff_ms() -> u64 {
        200
    }
    fn default_jitter_ms() -> u64 {
        50
    }
}

impl Default for Guard {
    fn default() -> Self {
        Guard {
            consent_required: false,
            max_retries: Guard::default_max_retries(),
            retry_backoff_ms: Guard::default_backoff_ms(),
            retry_backoff_jitter_ms: Guard::default_jitter_ms(),
            deadline_ms: None,
            token_budget: None,
            cost_budget_usd: None,
        }
    }
}

/// A single unit of work within a Plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub capability: CapabilityRef,
    pub input: serde_json::Value,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub guard: Guard,
    pub state: StepState,
    #[serde(default)]
    pub attempts: u32,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub last_error: Option<String>,
    pub output: Option<serde_json::Value>,
    /// Idempotency key threaded into tool input as `_idem_key` when set, so
    /// at-least-once re-execution after a crash can be deduped by the tool.
    pub idem_key: Option<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, capability: CapabilityRef, input: serde_json::Value) -> Self {
        Step {
            id: new_id(),
            name: name.into(),
            capability,
            input,
            deps: Vec::new(),
            guard: Guard::default(),
            state: StepState::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
            output: None,
            idem_key: None,
        }
    }

    /// The tool input with `_idem_key` merged in when an idempotency key is set.
    pub fn effective_input(&self) -> serde_json::Value {
        match (&self.idem_key, &self.input) {
            (Some(key), serde_json::Value::Object(map)) => {
                let mut map = map.clone();
                map.insert("_idem_key".to_string(), serde_json::Value::String(key.clone()));
                serde_json::Value::Object(map)
            }
            _ => self.input.clone(),
        }
    }
}

/// Optional resource ceilings attached to a Plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budget {
    pub tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub time_seconds: Option<u64>,
}

/// A DAG of Steps pursuing a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub state: PlanState,
    #[serde(default)]
    pub budget: Budget,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Plan {
    pub fn new(title: impl Into<String>, steps: Vec<Step>, now: i64) -> Self {
        Plan {
            id: new_id(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            state: PlanState::Draft,
            budget: Budget::default(),
            steps,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn transition(&mut self, next: PlanState, now: i64) -> Result<(), AppError> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", next),
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Append-only transcript entry kinds (spec.md §3/§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlanCreated,
    PlanStarted,
    PlanDone,
    PlanFailed,
    PlanRevised,
    PlanRevisedTo,
    StepStarted,
    StepDone,
    StepFailed,
    ChatUser,
    ChatAssistant,
}

/// A single entry in the append-only Event transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub ts: i64,
    pub kind: EventKind,
    pub plan_id: String,
    pub step_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, plan_id: impl Into<String>, step_id: Option<String>, payload: serde_json::Value, now: i64) -> Self {
        Event {
            id: new_id(),
            ts: now,
            kind,
            plan_id: plan_id.into(),
            step_id,
            payload,
        }
    }
}

/// A cached LLM response or other keyed artifact with an optional TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl CacheItem {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_state_transitions() {
        assert!(PlanState::Draft.can_transition_to(PlanState::Queued));
        assert!(PlanState::Queued.can_transition_to(PlanState::Running));
        assert!(PlanState::Running.can_transition_to(PlanState::Done));
        assert!(!PlanState::Done.can_transition_to(PlanState::Running));
        assert!(!PlanState::Draft.can_transition_to(PlanState::Done));
    }

    #[test]
    fn plan_transition_updates_timestamp_and_rejects_invalid() {
        let mut plan = Plan::new("goal", vec![], 100);
        plan.transition(PlanState::Queued, 200).unwrap();
        assert_eq!(plan.state, PlanState::Queued);
        assert_eq!(plan.updated_at, 200);

        let err = plan.transition(PlanState::Done, 300).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn step_state_terminality() {
        assert!(StepState::Done.is_terminal());
        assert!(StepState::Failed.is_terminal());
        assert!(StepState::Skipped.is_terminal());
        assert!(!StepState::Pending.is_terminal());
        assert!(!StepState::Running.is_terminal());
        assert!(!StepState::Blocked.is_terminal());
    }

    #[test]
    fn consent_token_wildcard_grants_everything() {
        let token = ConsentToken::wildcard();
        assert!(token.grants(ConsentScope::WriteFs));
        assert!(token.grants(ConsentScope::ExecCode));
    }

    #[test]
    fn consent_token_scoped_grants_only_listed_scopes() {
        let token = ConsentToken::new([ConsentScope::ReadFs, ConsentScope::ListFs]);
        assert!(token.grants(ConsentScope::ReadFs));
        assert!(token.grants(ConsentScope::ListFs));
        assert!(!token.grants(ConsentScope::WriteFs));
    }

    #[test]
    fn consent_scope_as_str_matches_original_naming() {
        assert_eq!(ConsentScope::ReadFs.as_str(), "read_fs");
        assert_eq!(ConsentScope::GitOps.as_str(), "git_ops");
    }

    #[test]
    fn step_effective_input_merges_idem_key() {
        let mut step = Step::new("write file", CapabilityRef::new("fs.write"), json!({"path": "a.txt"}));
        step.idem_key = Some("abc123".to_string());
        let merged = step.effective_input();
        assert_eq!(merged["path"], "a.txt");
        assert_eq!(merged["_idem_key"], "abc123");
    }

    #[test]
    fn step_effective_input_unchanged_without_idem_key() {
        let step = Step::new("read file", CapabilityRef::new("fs.read"), json!({"path": "a.txt"}));
        assert_eq!(step.effective_input(), json!({"path": "a.txt"}));
    }

    #[test]
    fn cache_item_expiry() {
        let item = CacheItem {
            key: "k".into(),
            value: "v".into(),
            metadata: serde_json::Value::Null,
            created_at: 0,
            expires_at: Some(1000),
        };
        assert!(!item.is_expired(999));
        assert!(item.is_expired(1000));
        assert!(item.is_expired(1001));
    }

    #[test]
    fn plan_step_lookup() {
        let step = Step::new("s1", CapabilityRef::new("fs.read"), json!({}));
        let id = step.id.clone();
        let plan = Plan::new("goal", vec![step], 0);
        assert!(plan.step(&id).is_some());
        assert!(plan.step("missing").is_none());
    }
}
