//! Per-step failure summarization, grounded in
//! `original_source/apps/api/olympus_api/nl_agent.py::summarize_result_nl`:
//! turn a Plan's failed Steps into a short, human-readable digest that
//! becomes the reflection prompt's context.
//!
//! spec.md §4.7 asks for more than name/error per failed Step: its
//! identity, the last ≤5 events attributable to it, and previews of any
//! `stdout|stderr|text|content` fields on its output — so a model revising
//! the plan sees roughly what a human tailing the transcript would.

use agentrt_core::{Event, Plan, Step, StepState};

const MAX_EVENTS_PER_STEP: usize = 5;
const MAX_PREVIEW_CHARS: usize = 512;
const OUTPUT_PREVIEW_FIELDS: &[&str] = &["stdout", "stderr", "text", "content"];

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_PREVIEW_CHARS {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(MAX_PREVIEW_CHARS).collect();
        out.push('\u{2026}');
        out
    }
}

fn output_previews(output: &serde_json::Value) -> Vec<String> {
    OUTPUT_PREVIEW_FIELDS
        .iter()
        .filter_map(|field| output.get(field).and_then(serde_json::Value::as_str).map(|v| format!("{field}={}", truncate(v))))
        .collect()
}

/// Events attributable to `step_id`, most recent first, capped at
/// `MAX_EVENTS_PER_STEP`. `events` need not be pre-sorted; it's the full
/// transcript for the plan.
fn recent_events_for(events: &[Event], step_id: &str) -> Vec<&Event> {
    let mut matching: Vec<&Event> = events.iter().filter(|e| e.step_id.as_deref() == Some(step_id)).collect();
    matching.sort_by_key(|e| e.ts);
    matching.into_iter().rev().take(MAX_EVENTS_PER_STEP).collect()
}

/// One block per failed Step: identity, name, capability, attempt count,
/// last error, its last few transcript events, and previews of any
/// stdout/stderr/text/content fields its last output carried.
pub fn summarize_failures(plan: &Plan, events: &[Event]) -> String {
    let failed: Vec<&Step> = plan.steps.iter().filter(|s| s.state == StepState::Failed).collect();
    if failed.is_empty() {
        return "no steps failed".to_string();
    }
    failed
        .iter()
        .map(|step| {
            let mut block = format!(
                "- step {} '{}' ({}) failed after {} attempt(s): {}",
                step.id,
                step.name,
                step.capability.name,
                step.attempts,
                step.last_error.as_deref().unwrap_or("unknown error")
            );

            let recent = recent_events_for(events, &step.id);
            if !recent.is_empty() {
                block.push_str("\n  recent events:");
                for event in recent {
                    block.push_str(&format!("\n    - {:?} @ {}", event.kind, event.ts));
                }
            }

            if let Some(output) = &step.output {
                let previews = output_previews(output);
                if !previews.is_empty() {
                    block.push_str("\n  output preview:");
                    for preview in previews {
                        block.push_str(&format!("\n    - {preview}"));
                    }
                }
            }

            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}
