//! Transport selection for managed streaming ingestion.
//!
//! For each (database, table) target the policy decides between the
//! low-latency streaming path and the durable queued path. There is no
//! explicit mode flag to keep in sync: a target is in queued mode exactly
//! while a live, non-expired error entry disqualifies streaming, and the mode
//! is a pure function of the current time and that entry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::StreamingPolicyConfig;
use crate::errors::ErrorCategory;
use crate::metrics_defs::STREAMING_DISQUALIFIED;

/// A (database, table) pair identifying an ingestion destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IngestTarget {
    pub database: String,
    pub table: String,
}

impl IngestTarget {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        IngestTarget {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for IngestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Rolling failure record for one target. Replaced whole on every
/// disqualifying error, never mutated in place.
#[derive(Debug)]
struct ErrorState {
    resume_streaming_after: Instant,
    category: ErrorCategory,
}

pub struct ManagedStreamingPolicy {
    clock: Arc<dyn Clock>,
    time_until_resuming_streaming: Duration,
    throttle_backoff: Duration,
    continue_when_streaming_unavailable: bool,
    states: RwLock<HashMap<IngestTarget, Arc<ErrorState>>>,
}

impl ManagedStreamingPolicy {
    pub fn new(clock: Arc<dyn Clock>, config: &StreamingPolicyConfig) -> Self {
        ManagedStreamingPolicy {
            clock,
            time_until_resuming_streaming: config.time_until_resuming_streaming(),
            throttle_backoff: config.throttle_backoff(),
            continue_when_streaming_unavailable: config.continue_when_streaming_unavailable,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the next submission for `target` should take the queued path.
    ///
    /// Expired entries are evicted lazily here; an entry for a disabled
    /// streaming endpoint can be overridden by the
    /// `continue_when_streaming_unavailable` probe setting.
    pub fn should_use_queued_ingestion(&self, target: &IngestTarget) -> bool {
        let Some(state) = self.states.read().get(target).cloned() else {
            return false;
        };

        if self.clock.now() >= state.resume_streaming_after {
            let mut states = self.states.write();
            // Only evict the entry we saw; a concurrent failure may have
            // installed a newer one in the meantime.
            if let Some(current) = states.get(target)
                && Arc::ptr_eq(current, &state)
            {
                states.remove(target);
            }
            return false;
        }

        if state.category == ErrorCategory::StreamingIngestionOff
            && self.continue_when_streaming_unavailable
        {
            return false;
        }

        true
    }

    /// Records a streaming failure. Structural errors impose the long
    /// cooldown, throttling the short one, anything else leaves the
    /// transport mode untouched.
    pub fn on_streaming_failure(&self, target: &IngestTarget, category: ErrorCategory) {
        let cooldown = match category {
            ErrorCategory::StreamingIngestionOff
            | ErrorCategory::TableConfigurationPreventsStreaming => {
                self.time_until_resuming_streaming
            }
            ErrorCategory::Throttled => self.throttle_backoff,
            ErrorCategory::Other => return,
        };

        let state = Arc::new(ErrorState {
            resume_streaming_after: self.clock.now() + cooldown,
            category,
        });
        self.states.write().insert(target.clone(), state);

        tracing::debug!(
            target = %target,
            ?category,
            cooldown_secs = cooldown.as_secs(),
            "target moved to queued ingestion"
        );
        metrics::counter!(STREAMING_DISQUALIFIED.name).increment(1);
    }

    /// Nothing to clear proactively: entries expire lazily, and a success
    /// while an entry is live means the caller probed streaming on purpose.
    pub fn on_streaming_success(&self, _target: &IngestTarget) {}
}
