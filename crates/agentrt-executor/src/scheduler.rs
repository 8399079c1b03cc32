//! Plan Executor (spec.md §4.3): a ready-set scheduler dispatching Steps as
//! concurrent tasks under a `tokio::sync::Semaphore`, re-persisting every
//! Step state change to the Durable Store before the transcript event for
//! that change is appended.
//!
//! The Executor itself has no analogue in the teacher repo (the teacher
//! dispatches CLI subprocesses on a fixed turn cadence, not a DAG of tool
//! calls); its concurrency shape — semaphore-bounded spawn, channel-based
//! completion collection, a short poll sleep when nothing is ready — is
//! grounded in `examples/RyderFreeman4Logos-cli-sub-agent/crates/csa-scheduler`'s
//! habit of small pure decision functions (here: [`crate::retry::decide_retry`])
//! wired into an outer async loop, plus the `agentrt-llm` router's existing
//! "check the store, call a backend, persist the result" shape reused for
//! each Step instead of each chat request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentrt_core::dag::{ready_steps, validate_dag};
use agentrt_core::{AppError, ConsentToken, Event, EventKind, Plan, PlanState, Step, StepState};
use agentrt_store::Store;
use agentrt_tools::{ToolContext, ToolRegistry};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::retry::{decide_retry, RetryDecision};

/// Runtime knobs for a [`PlanExecutor`], independent of any one Plan.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum Steps dispatched concurrently (spec.md §5, default 2).
    pub concurrency: usize,
    /// Whether a Step lacking its own `guard.consent_required` still needs
    /// a consent token under the global policy.
    pub require_consent: bool,
    /// Dev-mode escape hatch: synthesize a wildcard token instead of
    /// failing with `ConsentRequired` when none was supplied.
    pub auto_consent: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig { concurrency: 2, require_consent: true, auto_consent: false }
    }
}

/// Drives a single Plan's DAG to a terminal state.
pub struct PlanExecutor {
    store: Arc<Store>,
    registry: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(store: Arc<Store>, registry: Arc<ToolRegistry>, tool_ctx: ToolContext, config: ExecutorConfig) -> Self {
        PlanExecutor { store, registry, tool_ctx, config }
    }

    /// Rehydrate `plan_id` from the store and run its DAG to completion,
    /// returning the final persisted Plan. Steps already DONE/SKIPPED are
    /// not re-executed; Steps found RUNNING at rehydration are treated as
    /// abandoned and reset to PENDING (spec.md §4.3 Resume).
    pub async fn run_by_id(&self, plan_id: &str, consent: Option<ConsentToken>) -> Result<Plan, AppError> {
        let mut plan = self.store.get_plan(plan_id).map_err(AppError::from)?;
        self.run(&mut plan, consent, None).await?;
        Ok(plan)
    }

    /// Run an already-loaded Plan, mutating it in place and persisting
    /// every Step and Plan-level transition along the way. `cancel`, if
    /// given, is polled each scheduling pass; when it flips to `true` no
    /// further Steps are dispatched and the Plan transitions to CANCELLED
    /// once in-flight work drains.
    pub async fn run(&self, plan: &mut Plan, consent: Option<ConsentToken>, cancel: Option<Arc<AtomicBool>>) -> Result<(), AppError> {
        for step in plan.steps.iter_mut() {
            if step.state == StepState::Running {
                warn!(step = %step.id, "resuming: abandoning in-flight attempt, resetting to pending");
                step.state = StepState::Pending;
            }
        }
        validate_dag(plan)?;

        let now = now_unix();
        if plan.state == PlanState::Draft {
            plan.transition(PlanState::Queued, now)?;
        }
        if plan.state == PlanState::Queued {
            plan.transition(PlanState::Running, now)?;
            self.store.upsert_plan(plan)?;
            self.store.append_event(&Event::new(EventKind::PlanStarted, plan.id.clone(), None, json!({}), now))?;
        } else {
            self.store.upsert_plan(plan)?;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel::<Step>(self.config.concurrency.max(1) * 4);
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut failed = false;
        let mut cancelled = false;

        loop {
            let all_terminal = plan.steps.iter().all(|s| matches!(s.state, StepState::Done | StepState::Skipped));
            if all_terminal {
                break;
            }
            if (failed || cancelled) && in_flight.is_empty() {
                break;
            }

            let should_dispatch = !failed && !cancelled && !cancel.as_ref().map(|c| c.load(Ordering::SeqCst)).unwrap_or(false);
            if should_dispatch {
                for step in ready_steps(plan) {
                    if in_flight.contains(&step.id) {
                        continue;
                    }
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        continue;
                    };
                    in_flight.insert(step.id.clone());
                    let store = Arc::clone(&self.store);
                    let registry = Arc::clone(&self.registry);
                    let tool_ctx = self.tool_ctx.clone();
                    let plan_id = plan.id.clone();
                    let step_owned = step.clone();
                    let step_consent = resolve_consent(&self.config, consent.as_ref(), step_owned.guard.consent_required);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let finished = run_step(store, registry, tool_ctx, plan_id, step_owned, step_consent).await;
                        let _ = tx.send(finished).await;
                    });
                }
            } else if let Some(c) = &cancel {
                if c.load(Ordering::SeqCst) {
                    cancelled = true;
                }
            }

            tokio::select! {
                received = rx.recv() => {
                    let Some(finished) = received else { break };
                    in_flight.remove(&finished.id);
                    if finished.state == StepState::Failed {
                        failed = true;
                    }
                    if let Some(slot) = plan.steps.iter_mut().find(|s| s.id == finished.id) {
                        *slot = finished;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }

        let now = now_unix();
        if failed {
            plan.transition(PlanState::Failed, now)?;
            self.store.append_event(&Event::new(EventKind::PlanFailed, plan.id.clone(), None, json!({}), now))?;
        } else if cancelled {
            plan.transition(PlanState::Cancelled, now)?;
        } else {
            plan.transition(PlanState::Done, now)?;
            self.store.append_event(&Event::new(EventKind::PlanDone, plan.id.clone(), None, json!({}), now))?;
        }
        self.store.upsert_plan(plan)?;
        Ok(())
    }
}

/// Decide the consent token a Step's dispatch should present to the Tool
/// Registry, per spec.md §4.3 step 3: a token is required when either the
/// global policy or the Step's own Guard demands it; absent a supplied
/// token, dev-mode auto-consent synthesizes a wildcard, otherwise the Step
/// fails terminally with `ConsentRequired` once dispatched.
fn resolve_consent(config: &ExecutorConfig, supplied: Option<&ConsentToken>, step_requires: bool) -> Result<ConsentToken, AppError> {
    if let Some(token) = supplied {
        return Ok(token.clone());
    }
    if step_requires || config.require_consent {
        if config.auto_consent {
            Ok(ConsentToken::wildcard())
        } else {
            Err(AppError::ConsentRequired("no consent token supplied".to_string()))
        }
    } else {
        Ok(ConsentToken::wildcard())
    }
}

/// Run one Step's full attempt loop (spec.md §4.3 steps 1-6) to a terminal
/// state, persisting every transition and emitting its event before
/// returning the finished Step to the scheduler.
async fn run_step(store: Arc<Store>, registry: Arc<ToolRegistry>, tool_ctx: ToolContext, plan_id: String, mut step: Step, consent: Result<ConsentToken, AppError>) -> Step {
    let consent = match consent {
        Ok(token) => token,
        Err(err) => {
            fail_terminally(&store, &plan_id, &mut step, err);
            return step;
        }
    };

    loop {
        step.attempts += 1;
        if step.started_at.is_none() {
            step.started_at = Some(now_unix());
        }
        step.state = StepState::Running;
        persist_step(&store, &plan_id, &step);
        emit(&store, EventKind::StepStarted, &plan_id, Some(&step.id), json!({"attempt": step.attempts}));
        debug!(step = %step.id, attempt = step.attempts, capability = %step.capability.name, "dispatching step");

        let input = step.effective_input();
        let outcome = registry.invoke(&step.capability, input, &consent, &tool_ctx).await;

        match outcome {
            Ok(output) => {
                step.output = Some(output);
                step.state = StepState::Done;
                step.ended_at = Some(now_unix());
                persist_step(&store, &plan_id, &step);
                emit(&store, EventKind::StepDone, &plan_id, Some(&step.id), json!({"attempts": step.attempts}));
                return step;
            }
            Err(err) => {
                step.last_error = Some(err.to_string());
                if !err.is_retryable() {
                    fail_terminally(&store, &plan_id, &mut step, err);
                    return step;
                }
                let elapsed_ms = (now_unix() - step.started_at.unwrap_or(step.attempts as i64)).max(0) as u64;
                match decide_retry(&step.guard, step.attempts, elapsed_ms) {
                    RetryDecision::Terminal => {
                        fail_terminally(&store, &plan_id, &mut step, err);
                        return step;
                    }
                    RetryDecision::RetryAfter { delay_ms } => {
                        persist_step(&store, &plan_id, &step);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
    }
}

fn fail_terminally(store: &Store, plan_id: &str, step: &mut Step, err: AppError) {
    step.last_error = Some(err.to_string());
    step.state = StepState::Failed;
    step.ended_at = Some(now_unix());
    persist_step(store, plan_id, step);
    emit(store, EventKind::StepFailed, plan_id, Some(&step.id), json!({"error": step.last_error, "attempts": step.attempts}));
}

fn persist_step(store: &Store, plan_id: &str, step: &Step) {
    if let Err(err) = store.upsert_step(plan_id, step) {
        tracing::error!(step = %step.id, error = %err, "failed to persist step");
    }
}

fn emit(store: &Store, kind: EventKind, plan_id: &str, step_id: Option<&str>, payload: serde_json::Value) {
    let event = Event::new(kind, plan_id.to_string(), step_id.map(str::to_string), payload, now_unix());
    if let Err(err) = store.append_event(&event) {
        tracing::error!(error = %err, "failed to append event");
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
