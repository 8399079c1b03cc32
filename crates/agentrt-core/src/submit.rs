//! Plan submission normalization (spec.md §3 "Identity discipline", §6
//! "Plan submission"): turn a client-submitted request — Steps whose
//! `deps` may name either a literal sibling Step id or a decimal index
//! into the submitted list — into a fully-identified, DAG-validated Plan.
//!
//! Pure and I/O-free: persistence and `plan.created` transcript emission
//! are the caller's job (`agentrt-executor::submit_plan` wraps this with
//! a Durable Store write), matching this crate's "no I/O" charter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::dag::validate_dag;
use crate::error::AppError;
use crate::types::{CapabilityRef, Guard, Plan, Step};

/// One submitted Step before identity resolution. `deps` entries are
/// either a decimal string index into the request's `steps` list or a
/// literal Step identity already known to the caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepRequest {
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub guard: Option<Guard>,
}

/// A client-submitted Plan, pre-normalization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlanRequest {
    pub title: String,
    #[serde(default)]
    pub steps: Vec<StepRequest>,
    #[serde(default)]
    pub metadata: Value,
}

/// Build and validate a Plan from a submitted request.
///
/// Each submitted Step is assigned a fresh opaque id, then every `deps`
/// entry is resolved: a value parseable as a decimal index refers to that
/// position in the submitted list; otherwise it must equal one of the
/// freshly assigned ids (a literal identity the caller already knows,
/// e.g. because it names a Step from an earlier submission — rejected as
/// `UnknownStepReference` if it matches neither). DAG cycle validation
/// runs before this function returns, so a cyclic submission never
/// reaches the Durable Store.
pub fn build_plan(request: PlanRequest, now: i64) -> Result<Plan, AppError> {
    let mut steps: Vec<Step> = request
        .steps
        .iter()
        .map(|raw| {
            let mut step = Step::new(raw.name.clone(), CapabilityRef::new(raw.capability.clone()), raw.input.clone());
            if let Some(guard) = &raw.guard {
                step.guard = guard.clone();
            }
            step
        })
        .collect();

    let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
    let id_set: HashSet<&str> = ids.iter().map(String::as_str).collect();

    for (step, raw) in steps.iter_mut().zip(&request.steps) {
        let mut resolved = Vec::with_capacity(raw.deps.len());
        for dep in &raw.deps {
            let target = match dep.parse::<usize>() {
                Ok(index) => ids.get(index).cloned(),
                Err(_) => None,
            };
            let target = target.or_else(|| id_set.contains(dep.as_str()).then(|| dep.clone()));
            match target {
                Some(id) => resolved.push(id),
                None => return Err(AppError::UnknownStepReference(dep.clone())),
            }
        }
        step.deps = resolved;
    }

    let mut plan = Plan::new(request.title, steps, now);
    plan.metadata = request.metadata;
    validate_dag(&plan)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step_req(name: &str, capability: &str, deps: Vec<&str>) -> StepRequest {
        StepRequest { name: name.to_string(), capability: capability.to_string(), input: json!({}), deps: deps.into_iter().map(String::from).collect(), guard: None }
    }

    #[test]
    fn resolves_decimal_index_dependencies_to_identities() {
        let request = PlanRequest {
            title: "demo".to_string(),
            steps: vec![step_req("write", "fs.write", vec![]), step_req("read", "fs.read", vec!["0"])],
            metadata: Value::Null,
        };
        let plan = build_plan(request, 0).unwrap();
        assert_eq!(plan.steps[1].deps, vec![plan.steps[0].id.clone()]);
    }

    #[test]
    fn index_and_identity_dependencies_resolve_to_the_same_step() {
        // A dependent Step may name its predecessor either by index ("0")
        // or, once the predecessor's id is known, by that literal id.
        let request = PlanRequest { title: "probe".to_string(), steps: vec![step_req("a", "fs.read", vec![])], metadata: Value::Null };
        let probe = build_plan(request, 0).unwrap();
        let a_id = probe.steps[0].id.clone();

        let request = PlanRequest {
            title: "demo".to_string(),
            steps: vec![StepRequest { name: "a".into(), capability: "fs.read".into(), input: json!({}), deps: vec![], guard: None }, step_req("b", "fs.write", vec![&a_id])],
            metadata: Value::Null,
        };
        // The literal id from `probe` won't match this fresh submission's
        // freshly-generated id for "a", so this must be rejected.
        let err = build_plan(request, 0).unwrap_err();
        assert!(matches!(err, AppError::UnknownStepReference(_)));
    }

    #[test]
    fn rejects_unknown_dependency_reference() {
        let request = PlanRequest { title: "demo".to_string(), steps: vec![step_req("a", "fs.read", vec!["ghost"])], metadata: Value::Null };
        let err = build_plan(request, 0).unwrap_err();
        assert!(matches!(err, AppError::UnknownStepReference(ref id) if id == "ghost"));
    }

    #[test]
    fn rejects_out_of_range_index_dependency() {
        let request = PlanRequest { title: "demo".to_string(), steps: vec![step_req("a", "fs.read", vec!["5"])], metadata: Value::Null };
        let err = build_plan(request, 0).unwrap_err();
        assert!(matches!(err, AppError::UnknownStepReference(ref id) if id == "5"));
    }

    #[test]
    fn rejects_cyclic_submission_before_persistence() {
        let request = PlanRequest {
            title: "demo".to_string(),
            steps: vec![step_req("a", "fs.read", vec!["1"]), step_req("b", "fs.read", vec!["0"])],
            metadata: Value::Null,
        };
        let err = build_plan(request, 0).unwrap_err();
        assert!(matches!(err, AppError::CyclicPlan(_)));
    }

    #[test]
    fn preserves_step_order_and_metadata() {
        let request = PlanRequest {
            title: "demo".to_string(),
            steps: vec![step_req("a", "fs.read", vec![]), step_req("b", "fs.write", vec!["0"])],
            metadata: json!({"source": "cli"}),
        };
        let plan = build_plan(request, 42).unwrap();
        assert_eq!(plan.steps[0].name, "a");
        assert_eq!(plan.steps[1].name, "b");
        assert_eq!(plan.metadata, json!({"source": "cli"}));
        assert_eq!(plan.created_at, 42);
    }
}
