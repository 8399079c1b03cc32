//! Daily token/cost budget enforcement, grounded in
//! `original_source/packages/llm/olympus_llm/budget.py`'s
//! `BudgetManager.check_budget`/`update_budget`. The original keeps an
//! in-process counter reset at midnight; the rewrite persists the same
//! counters through the Durable Store's `facts` table keyed by calendar
//! day, so the budget survives process restarts (spec.md §5: "Global
//! counters (LLM budget) go through the store's cache keyspace").

use agentrt_store::Store;
use chrono::{DateTime, Utc};

use crate::RouterError;

/// `now` is milliseconds since the epoch, matching the data model's
/// timestamp convention (spec.md §3); bucketed to the calendar day in UTC.
fn day_key(now_ms: i64, suffix: &str) -> String {
    let date = DateTime::<Utc>::from_timestamp_millis(now_ms).map(|dt| dt.date_naive().to_string()).unwrap_or_else(|| "unknown-date".to_string());
    format!("llm_budget:{date}:{suffix}")
}

/// Check that `projected_tokens` more today — the caller's estimate of this
/// request's own usage, per spec.md §4.6: `len(prompt)/4` input plus
/// `max_tokens` output ceiling — would not push the daily token counter past
/// its budget, mirroring `BudgetManager.check_budget`'s `tokens >= projected`
/// comparison against the *remaining* budget rather than only the
/// already-spent counter. Does not record the spend — call [`record`] after
/// a successful backend call.
pub fn check(store: &Store, daily_token_budget: Option<u64>, daily_usd_budget: Option<f64>, projected_tokens: u64, now: i64) -> Result<(), RouterError> {
    if let Some(limit) = daily_token_budget {
        let spent: u64 = store.fact_get(&day_key(now, "tokens")).map_err(|e| RouterError::Budget(e.to_string()))?.and_then(|v| v.parse().ok()).unwrap_or(0);
        if spent.saturating_add(projected_tokens) > limit {
            return Err(RouterError::BudgetExceeded(format!("daily token budget would be exceeded: {spent} spent + {projected_tokens} projected > {limit}")));
        }
    }
    if let Some(limit) = daily_usd_budget {
        let spent: f64 = store.fact_get(&day_key(now, "cost_usd")).map_err(|e| RouterError::Budget(e.to_string()))?.and_then(|v| v.parse().ok()).unwrap_or(0.0);
        if spent >= limit {
            return Err(RouterError::BudgetExceeded(format!("daily cost budget exhausted: ${spent:.4}/${limit:.4}")));
        }
    }
    Ok(())
}

/// Record a successful call's spend against today's counters.
pub fn record(store: &Store, tokens_used: u64, cost_usd: f64, now: i64) -> Result<(), RouterError> {
    let tokens_key = day_key(now, "tokens");
    let spent_tokens: u64 = store.fact_get(&tokens_key).map_err(|e| RouterError::Budget(e.to_string()))?.and_then(|v| v.parse().ok()).unwrap_or(0);
    store.fact_set(&tokens_key, &(spent_tokens + tokens_used).to_string(), now).map_err(|e| RouterError::Budget(e.to_string()))?;

    let cost_key = day_key(now, "cost_usd");
    let spent_cost: f64 = store.fact_get(&cost_key).map_err(|e| RouterError::Budget(e.to_string()))?.and_then(|v| v.parse().ok()).unwrap_or(0.0);
    store.fact_set(&cost_key, &(spent_cost + cost_usd).to_string(), now).map_err(|e| RouterError::Budget(e.to_string()))?;
    Ok(())
}
