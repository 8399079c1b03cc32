//! Submission entry point (spec.md §6 "Plan submission"): normalize a
//! client request into a validated Plan (`agentrt_core::build_plan`),
//! persist it, and append the `plan.created` transcript event — the
//! three steps spec.md's control-flow overview describes as happening
//! before a client ever calls `run`.

use std::sync::Arc;

use agentrt_core::{AppError, Event, EventKind, Plan, PlanRequest};
use agentrt_store::Store;
use serde_json::json;

/// Normalize, validate, and durably persist a submitted Plan, emitting
/// `plan.created`. The returned Plan is in state `DRAFT`; callers invoke
/// `PlanExecutor::run`/`run_by_id` to execute it.
pub fn submit_plan(store: &Store, request: PlanRequest, now: i64) -> Result<Plan, AppError> {
    let plan = agentrt_core::build_plan(request, now)?;
    store.upsert_plan(&plan)?;
    store.append_event(&Event::new(
        EventKind::PlanCreated,
        plan.id.clone(),
        None,
        json!({ "title": plan.title, "step_count": plan.steps.len() }),
        now,
    ))?;
    Ok(plan)
}

/// Convenience wrapper sharing a `Store` behind an `Arc`, matching the
/// handles `PlanExecutor` itself is constructed with.
pub fn submit_plan_shared(store: &Arc<Store>, request: PlanRequest, now: i64) -> Result<Plan, AppError> {
    submit_plan(store, request, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_core::StepRequest;
    use serde_json::Value;

    fn step_req(name: &str, capability: &str, deps: Vec<&str>) -> StepRequest {
        StepRequest { name: name.to_string(), capability: capability.to_string(), input: Value::Null, deps: deps.into_iter().map(String::from).collect(), guard: None }
    }

    #[test]
    fn submit_persists_the_plan_and_emits_plan_created() {
        let store = Store::open_in_memory().unwrap();
        let request = PlanRequest {
            title: "demo".to_string(),
            steps: vec![step_req("write", "fs.write", vec![]), step_req("read", "fs.read", vec!["0"])],
            metadata: Value::Null,
        };

        let plan = submit_plan(&store, request, 1_000).unwrap();
        let fetched = store.get_plan(&plan.id).unwrap();
        assert_eq!(fetched.steps.len(), 2);
        assert_eq!(fetched.steps[1].deps, vec![fetched.steps[0].id.clone()]);

        let events = store.events_for_plan(&plan.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::PlanCreated);
    }

    #[test]
    fn submit_rejects_cyclic_plans_without_persisting() {
        let store = Store::open_in_memory().unwrap();
        let request = PlanRequest {
            title: "cyclic".to_string(),
            steps: vec![step_req("a", "fs.read", vec!["1"]), step_req("b", "fs.read", vec!["0"])],
            metadata: Value::Null,
        };

        let err = submit_plan(&store, request, 0).unwrap_err();
        assert!(matches!(err, AppError::CyclicPlan(_)));
    }
}
