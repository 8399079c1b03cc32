//! JSON-plan extraction from LLM output, grounded verbatim in
//! `original_source/apps/api/olympus_api/planner.py::_parse_plan_json`:
//! take the substring between the first `{` and the last `}` (models
//! routinely wrap JSON in prose or markdown fences) and parse that; on
//! any failure, fall back to a trivial canned plan rather than erroring
//! out the whole reflection loop.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParsedStep {
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub deps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParsedPlan {
    pub title: String,
    pub steps: Vec<ParsedStep>,
}

/// The original's canned fallback: a `fs.write` step followed by a
/// dependent `fs.read` step, used whenever the model's output can't be
/// parsed as a plan at all.
pub fn fallback_plan() -> ParsedPlan {
    ParsedPlan {
        title: "write+read fallback".to_string(),
        steps: vec![
            ParsedStep {
                name: "write".to_string(),
                capability: "fs.write".to_string(),
                input: serde_json::json!({"path": "fallback.txt", "content": "fallback"}),
                deps: vec![],
            },
            ParsedStep {
                name: "read".to_string(),
                capability: "fs.read".to_string(),
                input: serde_json::json!({"path": "fallback.txt"}),
                deps: vec!["write".to_string()],
            },
        ],
    }
}

/// Extract and parse a plan from raw model output, falling back to
/// [`fallback_plan`] on any extraction or parse failure.
pub fn parse_plan_json(raw: &str) -> ParsedPlan {
    try_parse_plan_json(raw).unwrap_or_else(|_| fallback_plan())
}

/// Same extraction, surfacing the parse error instead of silently falling
/// back — useful where a caller wants to log why the fallback triggered.
pub fn try_parse_plan_json(raw: &str) -> Result<ParsedPlan, serde_json::Error> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let candidate = match (start, end) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    };
    serde_json::from_str(candidate)
}
