use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Retry delay list cannot be empty")]
    EmptyRetryDelays,

    #[error("Resource refresh interval cannot be zero")]
    ZeroRefreshInterval,

    #[error("Upload concurrency cannot be zero")]
    ZeroMaxConcurrency,

    #[error("Maximum source size cannot be zero while size checking is enabled")]
    ZeroMaxSourceSize,

    #[error("Streaming cooldown '{0}' cannot be zero")]
    ZeroCooldown(&'static str),
}

/// Retry behavior for transient upload and submission failures.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff delays in milliseconds, one per retry.
    pub delays_ms: Vec<u64>,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            delays_ms: vec![1000, 2000, 4000],
            jitter_ms: 50,
        }
    }
}

impl RetryConfig {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

/// Refresh behavior of the ingestion resource cache.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceConfig {
    /// Default refresh interval. The server may supply a shorter hint.
    pub refresh_interval_secs: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        ResourceConfig {
            refresh_interval_secs: 3600,
        }
    }
}

impl ResourceConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Limits for container uploads.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted source, checked before any network call.
    pub max_source_size_bytes: u64,
    /// Disable to skip the size precondition entirely.
    pub verify_size_limit: bool,
    /// Maximum number of sibling uploads running at once in a batch.
    pub max_concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_source_size_bytes: 4 * 1024 * 1024 * 1024,
            verify_size_limit: true,
            max_concurrency: 8,
        }
    }
}

/// Cooldown windows of the managed streaming policy.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingPolicyConfig {
    /// Cooldown after a structurally disabled streaming endpoint.
    pub time_until_resuming_streaming_secs: u64,
    /// Shorter window after a throttled streaming attempt.
    pub throttle_backoff_secs: u64,
    /// Keep probing streaming even while it is reported as unavailable.
    pub continue_when_streaming_unavailable: bool,
}

impl Default for StreamingPolicyConfig {
    fn default() -> Self {
        StreamingPolicyConfig {
            time_until_resuming_streaming_secs: 900,
            throttle_backoff_secs: 30,
            continue_when_streaming_unavailable: false,
        }
    }
}

impl StreamingPolicyConfig {
    pub fn time_until_resuming_streaming(&self) -> Duration {
        Duration::from_secs(self.time_until_resuming_streaming_secs)
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_secs(self.throttle_backoff_secs)
    }
}

/// Ingestion client configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub retry: RetryConfig,
    pub resources: ResourceConfig,
    pub upload: UploadConfig,
    pub streaming: StreamingPolicyConfig,
}

impl IngestConfig {
    /// Validates the ingestion configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retry.delays_ms.is_empty() {
            return Err(ValidationError::EmptyRetryDelays);
        }

        if self.resources.refresh_interval_secs == 0 {
            return Err(ValidationError::ZeroRefreshInterval);
        }

        if self.upload.max_concurrency == 0 {
            return Err(ValidationError::ZeroMaxConcurrency);
        }

        if self.upload.verify_size_limit && self.upload.max_source_size_bytes == 0 {
            return Err(ValidationError::ZeroMaxSourceSize);
        }

        if self.streaming.time_until_resuming_streaming_secs == 0 {
            return Err(ValidationError::ZeroCooldown(
                "time_until_resuming_streaming_secs",
            ));
        }

        if self.streaming.throttle_backoff_secs == 0 {
            return Err(ValidationError::ZeroCooldown("throttle_backoff_secs"));
        }

        Ok(())
    }
}
