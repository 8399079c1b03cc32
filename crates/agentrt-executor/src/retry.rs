//! Per-step retry/backoff decision, kept as a pure function of (attempts,
//! guard, elapsed) so it can be exhaustively unit tested without spinning up
//! a scheduler. Shaped after
//! `examples/RyderFreeman4Logos-cli-sub-agent/crates/csa-scheduler`'s
//! `decide_failover`/`detect_rate_limit` (pure decision functions returning
//! a tagged enum) and `mofa-runtime::retry::RetryPolicy::delay_for`'s
//! exponential-backoff-with-jitter shape — here the policy is linear
//! (`retry_backoff_ms + uniform(0, retry_backoff_jitter_ms)`) per the
//! runtime's Guard contract rather than exponential.

use agentrt_core::Guard;
use rand::Rng;

/// What the per-step controller should do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep this long, then retry from attempt 1 of the step loop.
    RetryAfter { delay_ms: u64 },
    /// Retry budget or deadline exhausted; the step is terminally failed.
    Terminal,
}

/// Decide whether a failed Step attempt should retry or fail terminally.
///
/// `attempts` is the count *after* the failed attempt (i.e. the value
/// already incremented at the start of the attempt). `elapsed_ms` is the
/// wall-clock time since the Step's `started_at` (first attempt).
pub fn decide_retry(guard: &Guard, attempts: u32, elapsed_ms: u64) -> RetryDecision {
    if attempts > guard.max_retries {
        return RetryDecision::Terminal;
    }
    if let Some(deadline_ms) = guard.deadline_ms {
        if elapsed_ms > deadline_ms {
            return RetryDecision::Terminal;
        }
    }
    let jitter = if guard.retry_backoff_jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=guard.retry_backoff_jitter_ms) };
    RetryDecision::RetryAfter { delay_ms: guard.retry_backoff_ms + jitter }
}
