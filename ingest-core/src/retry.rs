//! Retry policies for transient failures.
//!
//! A policy is a pure decision function: given the number of attempts already
//! made, it returns whether to retry and how long to wait. Policies keep no
//! state beyond their own configuration, so a single instance can be shared
//! across all uploaders and the orchestrator.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Outcome of a single retry evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub interval: Duration,
}

impl RetryDecision {
    pub fn stop() -> Self {
        RetryDecision {
            should_retry: false,
            interval: Duration::ZERO,
        }
    }

    pub fn retry_after(interval: Duration) -> Self {
        RetryDecision {
            should_retry: true,
            interval,
        }
    }
}

/// Decides whether a failed attempt should be retried.
///
/// `attempt_number` is 1-based and counts the attempts already made.
pub trait RetryPolicy: Send + Sync {
    fn next_decision(&self, attempt_number: u32) -> RetryDecision;
}

/// Fixed delay sequence with independent uniform jitter per decision.
///
/// The default sequence is `[1s, 2s, 4s]`; once it is exhausted the policy
/// declines further retries.
#[derive(Debug, Clone)]
pub struct BackoffRetryPolicy {
    delays: Vec<Duration>,
    jitter: Duration,
}

impl BackoffRetryPolicy {
    pub fn new(delays: Vec<Duration>, jitter: Duration) -> Self {
        BackoffRetryPolicy { delays, jitter }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        BackoffRetryPolicy {
            delays: config.delays(),
            jitter: config.jitter(),
        }
    }

    fn jitter_sample(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

impl Default for BackoffRetryPolicy {
    fn default() -> Self {
        BackoffRetryPolicy::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy for BackoffRetryPolicy {
    fn next_decision(&self, attempt_number: u32) -> RetryDecision {
        let index = attempt_number.saturating_sub(1) as usize;
        match self.delays.get(index) {
            Some(delay) => RetryDecision::retry_after(*delay + self.jitter_sample()),
            None => RetryDecision::stop(),
        }
    }
}

/// Always declines, for callers that want fail-fast semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn next_decision(&self, _attempt_number: u32) -> RetryDecision {
        RetryDecision::stop()
    }
}
