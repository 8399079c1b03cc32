//! Reflection Loop (spec.md §4.7): propose an initial Plan from a goal,
//! and revise a failed Plan from a failure summary. Both paths go through
//! the same JSON-extraction-with-canned-fallback parser, grounded in
//! `original_source/apps/api/olympus_api/planner.py`.

pub mod parse;
pub mod summary;

use std::sync::Arc;

use agentrt_core::{CapabilityRef, Event, EventKind, Guard, Plan, PlanState, Step};
use agentrt_executor::PlanExecutor;
use agentrt_llm::{ChatMessage, ChatRequest, LlmRouter, RouterError};
use agentrt_store::Store;
use serde_json::json;
use thiserror::Error;

pub use parse::{fallback_plan, parse_plan_json, try_parse_plan_json, ParsedPlan, ParsedStep};
pub use summary::summarize_failures;

#[derive(Error, Debug)]
pub enum ReflectError {
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error(transparent)]
    App(#[from] agentrt_core::AppError),
}

const PROPOSE_SYSTEM_PROMPT: &str = "You are a planning assistant. Given a goal, respond with ONLY a JSON object \
of the shape {\"title\": string, \"steps\": [{\"name\": string, \"capability\": string, \"input\": object, \"deps\": [string]}]}. \
Do not include any other text.";

const REVISE_SYSTEM_PROMPT: &str = "You are a planning assistant revising a failed plan. Given the original goal and a \
summary of which steps failed and why, respond with ONLY a JSON object of the same plan shape describing a revised plan \
that avoids the failures. Do not include any other text.";

/// Builds a Plan from parsed JSON, re-pointing each Step's `deps` from the
/// model's human-readable step names to the freshly generated opaque
/// Step ids the rest of the runtime expects dependencies to reference.
fn parsed_plan_into_plan(parsed: ParsedPlan, now: i64) -> Plan {
    let steps: Vec<Step> = parsed
        .steps
        .iter()
        .map(|p| {
            let mut step = Step::new(p.name.clone(), CapabilityRef::new(p.capability.clone()), p.input.clone());
            step.guard = Guard::default();
            step
        })
        .collect();

    let name_to_id: std::collections::HashMap<&str, &str> = parsed.steps.iter().zip(&steps).map(|(p, s)| (p.name.as_str(), s.id.as_str())).collect();

    let steps: Vec<Step> = parsed
        .steps
        .into_iter()
        .zip(steps)
        .map(|(p, mut step)| {
            step.deps = p.deps.iter().filter_map(|dep_name| name_to_id.get(dep_name.as_str())).map(|id| id.to_string()).collect();
            step
        })
        .collect();

    Plan::new(parsed.title, steps, now)
}

/// Ask the model to propose an initial Plan for `goal`, given optional
/// free-text `context` (e.g. retrieved facts). Falls back to the canned
/// write+read plan if the model's response can't be parsed as JSON.
pub async fn propose_plan(router: &LlmRouter, model: &str, goal: &str, context: Option<&str>, now: i64) -> Result<Plan, ReflectError> {
    let mut messages = vec![ChatMessage { role: "system".to_string(), content: PROPOSE_SYSTEM_PROMPT.to_string() }];
    if let Some(context) = context {
        messages.push(ChatMessage { role: "system".to_string(), content: format!("Context:\n{context}") });
    }
    messages.push(ChatMessage { role: "user".to_string(), content: goal.to_string() });

    let request = ChatRequest { model: model.to_string(), messages, temperature: 0.2, max_tokens: 1024 };
    let response = router.chat(request, now).await?;
    let parsed = parse_plan_json(&response.content);
    Ok(parsed_plan_into_plan(parsed, now))
}

/// Ask the model to revise `plan` after it failed, given a human-readable
/// failure summary built from `plan` and its `events` (see
/// [`summarize_failures`]). Returns the revised Plan; callers are
/// responsible for linking it to the original via `plan.revised`/
/// `plan.revised_to` events in the transcript.
pub async fn reflect_and_revise(router: &LlmRouter, model: &str, plan: &Plan, events: &[Event], goal: &str, now: i64) -> Result<Plan, ReflectError> {
    let failure_summary = summarize_failures(plan, events);
    let messages = vec![
        ChatMessage { role: "system".to_string(), content: REVISE_SYSTEM_PROMPT.to_string() },
        ChatMessage { role: "user".to_string(), content: format!("Original goal: {goal}\n\nFailures:\n{failure_summary}") },
    ];
    let request = ChatRequest { model: model.to_string(), messages, temperature: 0.2, max_tokens: 1024 };
    let response = router.chat(request, now).await?;
    let parsed = parse_plan_json(&response.content);
    Ok(parsed_plan_into_plan(parsed, now))
}

/// Drive the full Reflection Loop (spec.md §4.7): given a Plan already
/// submitted, persisted, and run to a terminal state, repeatedly revise
/// and re-execute failures until the Plan succeeds or `max_iterations` is
/// exhausted. Each revision gets a fresh identity, linked to its parent by
/// a `plan.revised`/`plan.revised_to` event pair; the loop re-enters
/// `PlanExecutor::run` for every revision, matching "re-enter §4.3 up to a
/// configured iteration bound".
///
/// Returns the final Plan reached (either the first that finishes DONE,
/// or the last revision attempted once the bound is hit).
pub async fn run_reflection_loop(
    store: &Arc<Store>,
    executor: &PlanExecutor,
    router: &LlmRouter,
    model: &str,
    mut plan: Plan,
    goal: &str,
    max_iterations: u32,
    now: i64,
) -> Result<Plan, ReflectError> {
    let mut iterations = 0;
    while plan.state == PlanState::Failed && iterations < max_iterations {
        let events = store.events_for_plan(&plan.id).map_err(agentrt_core::AppError::from)?;
        let revised = reflect_and_revise(router, model, &plan, &events, goal, now).await?;

        store.upsert_plan(&revised).map_err(agentrt_core::AppError::from)?;
        store
            .append_event(&Event::new(EventKind::PlanRevised, revised.id.clone(), None, json!({ "parent_plan_id": plan.id.clone() }), now))
            .map_err(agentrt_core::AppError::from)?;
        store
            .append_event(&Event::new(EventKind::PlanRevisedTo, plan.id.clone(), None, json!({ "revised_plan_id": revised.id.clone() }), now))
            .map_err(agentrt_core::AppError::from)?;

        let mut revised = revised;
        executor.run(&mut revised, None, None).await?;
        store.upsert_plan(&revised).map_err(agentrt_core::AppError::from)?;

        plan = revised;
        iterations += 1;
    }
    Ok(plan)
}
