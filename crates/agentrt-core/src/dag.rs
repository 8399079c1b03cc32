//! Dependency-graph validation for a Plan's Steps.
//!
//! Ported from the teacher's `csa-todo::dag::DependencyGraph` cycle
//! detection: build an adjacency list keyed by Step id, compute in-degrees,
//! and run Kahn's algorithm. Steps left over once the queue drains are
//! exactly the nodes participating in a cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::AppError;
use crate::types::{Plan, Step};

/// Validate that a Plan's Step dependency graph is acyclic and that every
/// `deps` entry refers to a Step that actually exists in the Plan.
///
/// Returns a topological order of Step ids on success.
pub fn validate_dag(plan: &Plan) -> Result<Vec<String>, AppError> {
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &plan.steps {
        for dep in &step.deps {
            if !ids.contains(dep.as_str()) {
                return Err(AppError::UnknownStepReference(dep.clone()));
            }
        }
    }

    let order = topological_sort(&plan.steps);
    if order.len() != plan.steps.len() {
        let sorted: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let cyclic: Vec<String> = plan
            .steps
            .iter()
            .map(|s| s.id.clone())
            .filter(|id| !sorted.contains(id.as_str()))
            .collect();
        return Err(AppError::CyclicPlan(cyclic.join(", ")));
    }
    Ok(order)
}

/// Kahn's algorithm: repeatedly peel off nodes with no remaining
/// dependencies. Nodes never peeled off are part of a cycle and are simply
/// absent from the returned order.
fn topological_sort(steps: &[Step]) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        in_degree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.deps {
            *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    // Stable order for deterministic tests: sort the initial ready set by
    // the Plan's own Step ordering rather than HashMap iteration order.
    let position: HashMap<&str, usize> = steps.iter().enumerate().map(|(i, s)| (s.id.as_str(), i)).collect();
    let mut initial: Vec<&str> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(&id, _)| id).collect();
    initial.sort_by_key(|id| position[id]);
    let mut queue: VecDeque<&str> = initial.into();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            let mut newly_ready = Vec::new();
            for &child in children {
                let deg = in_degree.get_mut(child).expect("child must have an in-degree entry");
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(child);
                }
            }
            newly_ready.sort_by_key(|id| position[id]);
            for child in newly_ready {
                queue.push_back(child);
            }
        }
    }
    order
}

/// Steps whose dependencies are all terminal-done and whose own state is
/// `Pending` or `Blocked` (spec.md §4.3: "a Step is ready when it is PENDING
/// or BLOCKED and every dependency is DONE") — the scheduler's ready set for
/// a single pass. Pure function of persisted state, no in-memory carry-over
/// between passes.
pub fn ready_steps<'a>(plan: &'a Plan) -> Vec<&'a Step> {
    use crate::types::StepState;

    plan.steps
        .iter()
        .filter(|step| matches!(step.state, StepState::Pending | StepState::Blocked))
        .filter(|step| {
            step.deps.iter().all(|dep_id| {
                plan.step(dep_id)
                    .map(|dep| dep.state == StepState::Done)
                    .unwrap_or(false)
            })
        })
        .collect()
}
