//! Caller-facing coordination of streaming and queued ingestion.
//!
//! For each submission the orchestrator consults the managed streaming
//! policy, attempts the chosen transport, and feeds transport failures back
//! into the policy. Disqualifying streaming errors fall back to the queued
//! path within the same call; transient ones are retried in place first.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::container::{BlobRef, ContainerUploader, IngestSource, UploadFailure};
use crate::errors::{ErrorCategory, IngestError, SubmitError};
use crate::metrics_defs::STREAMING_FALLBACKS;
use crate::retry::RetryPolicy;
use crate::streaming_policy::{IngestTarget, ManagedStreamingPolicy};

/// Submits a source directly over the low-latency streaming endpoint.
#[async_trait::async_trait]
pub trait StreamingSubmitClient: Send + Sync {
    async fn submit(
        &self,
        target: &IngestTarget,
        source: &IngestSource,
        cancel: &CancellationToken,
    ) -> Result<(), SubmitError>;
}

/// Enqueues an already-uploaded blob for durable asynchronous ingestion.
#[async_trait::async_trait]
pub trait QueuedSubmitClient: Send + Sync {
    async fn submit(
        &self,
        target: &IngestTarget,
        blob: &BlobRef,
        cancel: &CancellationToken,
    ) -> Result<(), SubmitError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Streaming,
    Queued,
}

/// Receipt for one accepted submission.
#[derive(Debug)]
pub struct SubmissionHandle {
    pub target: IngestTarget,
    pub source_name: String,
    pub transport: Transport,
    /// The uploaded blob, present only on the queued path.
    pub blob: Option<BlobRef>,
}

/// Why a streaming attempt gave up, and whether the queued path applies.
enum StreamingAttempt {
    Fallback(ErrorCategory),
    Fatal(IngestError),
}

pub struct IngestionOrchestrator {
    policy: Arc<ManagedStreamingPolicy>,
    uploader: ContainerUploader,
    streaming: Arc<dyn StreamingSubmitClient>,
    queued: Arc<dyn QueuedSubmitClient>,
    retry: Arc<dyn RetryPolicy>,
}

impl IngestionOrchestrator {
    pub fn new(
        policy: Arc<ManagedStreamingPolicy>,
        uploader: ContainerUploader,
        streaming: Arc<dyn StreamingSubmitClient>,
        queued: Arc<dyn QueuedSubmitClient>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Self {
        IngestionOrchestrator {
            policy,
            uploader,
            streaming,
            queued,
            retry,
        }
    }

    /// Ingests one source, choosing the transport per the policy's current
    /// view of the target.
    pub async fn ingest(
        &self,
        target: &IngestTarget,
        source: IngestSource,
        cancel: &CancellationToken,
    ) -> Result<SubmissionHandle, IngestError> {
        if !self.policy.should_use_queued_ingestion(target) {
            match self.try_streaming(target, &source, cancel).await {
                Ok(()) => {
                    self.policy.on_streaming_success(target);
                    return Ok(SubmissionHandle {
                        target: target.clone(),
                        source_name: source.name,
                        transport: Transport::Streaming,
                        blob: None,
                    });
                }
                Err(StreamingAttempt::Fallback(category)) => {
                    tracing::warn!(
                        target = %target,
                        ?category,
                        "streaming attempt failed, falling back to queued ingestion"
                    );
                    metrics::counter!(STREAMING_FALLBACKS.name).increment(1);
                }
                Err(StreamingAttempt::Fatal(err)) => return Err(err),
            }
        }

        self.ingest_queued(target, source, cancel).await
    }

    /// Ingests a batch over the queued transport: best-effort uploads, then
    /// one queued submission per uploaded blob.
    pub async fn ingest_many(
        &self,
        target: &IngestTarget,
        sources: Vec<IngestSource>,
        cancel: &CancellationToken,
    ) -> BatchIngestResult {
        let uploads = self.uploader.upload_many(sources, cancel, None).await;

        let mut result = BatchIngestResult {
            submitted: Vec::new(),
            failures: uploads.failures,
            cancelled: uploads.cancelled,
        };

        for success in uploads.successes {
            match self.queued.submit(target, &success.blob, cancel).await {
                Ok(()) => result.submitted.push(SubmissionHandle {
                    target: target.clone(),
                    source_name: success.source_name,
                    transport: Transport::Queued,
                    blob: Some(success.blob),
                }),
                Err(err) => {
                    let error = IngestError::Submit(err);
                    result.failures.push(UploadFailure {
                        is_permanent: error.is_permanent(),
                        source_name: success.source_name,
                        started_at: success.started_at,
                        completed_at: success.completed_at,
                        error,
                    });
                }
            }
        }

        result
    }

    async fn try_streaming(
        &self,
        target: &IngestTarget,
        source: &IngestSource,
        cancel: &CancellationToken,
    ) -> Result<(), StreamingAttempt> {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(StreamingAttempt::Fatal(IngestError::Cancelled));
            }

            attempts += 1;
            match self.streaming.submit(target, source, cancel).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let category = err.category;
                    self.policy.on_streaming_failure(target, category);

                    if category.disqualifies_streaming() {
                        return Err(StreamingAttempt::Fallback(category));
                    }
                    if err.permanent {
                        return Err(StreamingAttempt::Fatal(IngestError::Submit(err)));
                    }

                    let decision = self.retry.next_decision(attempts);
                    if !decision.should_retry {
                        // Transient retries exhausted; the durable path is
                        // still worth one shot.
                        return Err(StreamingAttempt::Fallback(ErrorCategory::Other));
                    }

                    tracing::debug!(
                        target = %target,
                        attempt = attempts,
                        "transient streaming failure, retrying: {err}"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(StreamingAttempt::Fatal(IngestError::Cancelled));
                        }
                        _ = tokio::time::sleep(decision.interval) => {}
                    }
                }
            }
        }
    }

    async fn ingest_queued(
        &self,
        target: &IngestTarget,
        source: IngestSource,
        cancel: &CancellationToken,
    ) -> Result<SubmissionHandle, IngestError> {
        let blob = self.uploader.upload(&source, cancel).await?;
        self.queued.submit(target, &blob, cancel).await?;

        Ok(SubmissionHandle {
            target: target.clone(),
            source_name: source.name,
            transport: Transport::Queued,
            blob: Some(blob),
        })
    }
}

/// Aggregate of a batch ingestion keyed by the queued transport.
#[derive(Debug)]
pub struct BatchIngestResult {
    pub submitted: Vec<SubmissionHandle>,
    pub failures: Vec<UploadFailure>,
    pub cancelled: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StreamingPolicyConfig, UploadConfig};
    use crate::container::ContainerSelector;
    use crate::resources::ResourceCache;
    use crate::retry::BackoffRetryPolicy;
    use crate::testutils::{
        CountingFetcher, FakeTransferClient, ManualClock, manual_clock, resources,
    };
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedStreamingClient {
        responses: Mutex<VecDeque<Result<(), SubmitError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedStreamingClient {
        fn new(responses: Vec<Result<(), SubmitError>>) -> Self {
            ScriptedStreamingClient {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl StreamingSubmitClient for ScriptedStreamingClient {
        async fn submit(
            &self,
            _target: &IngestTarget,
            _source: &IngestSource,
            _cancel: &CancellationToken,
        ) -> Result<(), SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    struct RecordingQueuedClient {
        calls: AtomicUsize,
    }

    impl RecordingQueuedClient {
        fn new() -> Self {
            RecordingQueuedClient {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl QueuedSubmitClient for RecordingQueuedClient {
        async fn submit(
            &self,
            _target: &IngestTarget,
            _blob: &BlobRef,
            _cancel: &CancellationToken,
        ) -> Result<(), SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        streaming: Arc<ScriptedStreamingClient>,
        queued: Arc<RecordingQueuedClient>,
        orchestrator: IngestionOrchestrator,
    }

    fn fixture(streaming_responses: Vec<Result<(), SubmitError>>) -> Fixture {
        let (clock, as_dyn) = manual_clock();
        let policy = Arc::new(ManagedStreamingPolicy::new(
            as_dyn.clone(),
            &StreamingPolicyConfig::default(),
        ));

        let cache = Arc::new(ResourceCache::new(
            Arc::new(CountingFetcher::new(resources(&["http://c1"]))),
            as_dyn,
            Duration::from_secs(3600),
        ));
        let uploader = ContainerUploader::new(
            cache,
            Arc::new(ContainerSelector::new()),
            Arc::new(FakeTransferClient::always_succeed()),
            Arc::new(BackoffRetryPolicy::new(vec![Duration::ZERO; 2], Duration::ZERO)),
            UploadConfig::default(),
        );

        let streaming = Arc::new(ScriptedStreamingClient::new(streaming_responses));
        let queued = Arc::new(RecordingQueuedClient::new());
        let retry = Arc::new(BackoffRetryPolicy::new(
            vec![Duration::ZERO; 2],
            Duration::ZERO,
        ));

        let orchestrator = IngestionOrchestrator::new(
            policy,
            uploader,
            streaming.clone(),
            queued.clone(),
            retry,
        );

        Fixture {
            clock,
            streaming,
            queued,
            orchestrator,
        }
    }

    fn target() -> IngestTarget {
        IngestTarget::new("db", "events")
    }

    fn source(name: &str) -> IngestSource {
        IngestSource::new(name, Bytes::from_static(b"payload"))
    }

    fn streaming_off() -> SubmitError {
        SubmitError::permanent("streaming ingestion is disabled")
            .with_category(ErrorCategory::StreamingIngestionOff)
    }

    #[tokio::test]
    async fn test_streaming_success() {
        let fx = fixture(vec![Ok(())]);

        let handle = fx
            .orchestrator
            .ingest(&target(), source("events"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.transport, Transport::Streaming);
        assert!(handle.blob.is_none());
        assert_eq!(fx.streaming.calls(), 1);
        assert_eq!(fx.queued.calls(), 0);
    }

    #[tokio::test]
    async fn test_disqualifying_error_falls_back_and_sticks() {
        let fx = fixture(vec![Err(streaming_off())]);

        let handle = fx
            .orchestrator
            .ingest(&target(), source("first"), &CancellationToken::new())
            .await
            .unwrap();

        // Fell back to the queued path within the same call.
        assert_eq!(handle.transport, Transport::Queued);
        assert!(handle.blob.is_some());
        assert_eq!(fx.streaming.calls(), 1);
        assert_eq!(fx.queued.calls(), 1);

        // The next submission skips streaming entirely.
        let handle = fx
            .orchestrator
            .ingest(&target(), source("second"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.transport, Transport::Queued);
        assert_eq!(fx.streaming.calls(), 1);

        // Past the cooldown, streaming is attempted again.
        fx.clock.advance(Duration::from_secs(900));
        let handle = fx
            .orchestrator
            .ingest(&target(), source("third"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.transport, Transport::Streaming);
        assert_eq!(fx.streaming.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_streaming_failure_retried_in_place() {
        let fx = fixture(vec![
            Err(SubmitError::transient("hiccup")),
            Err(SubmitError::transient("hiccup")),
            Ok(()),
        ]);

        let handle = fx
            .orchestrator
            .ingest(&target(), source("events"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.transport, Transport::Streaming);
        assert_eq!(fx.streaming.calls(), 3);
        assert_eq!(fx.queued.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_falls_back_to_queued() {
        let fx = fixture(vec![
            Err(SubmitError::transient("hiccup")),
            Err(SubmitError::transient("hiccup")),
            Err(SubmitError::transient("hiccup")),
        ]);

        let handle = fx
            .orchestrator
            .ingest(&target(), source("events"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.transport, Transport::Queued);
        // Two retries after the first attempt, then the fallback.
        assert_eq!(fx.streaming.calls(), 3);
        assert_eq!(fx.queued.calls(), 1);

        // A transient run of bad luck does not disqualify the target.
        let handle = fx
            .orchestrator
            .ingest(&target(), source("next"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.transport, Transport::Streaming);
    }

    #[tokio::test]
    async fn test_permanent_streaming_error_surfaces() {
        let fx = fixture(vec![Err(SubmitError::permanent("malformed request"))]);

        let err = fx
            .orchestrator
            .ingest(&target(), source("events"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Submit(_)));
        assert!(err.is_permanent());
        assert_eq!(fx.queued.calls(), 0);
    }

    #[tokio::test]
    async fn test_throttled_target_uses_short_cooldown() {
        let fx = fixture(vec![
            Err(SubmitError::transient("slow down").with_category(ErrorCategory::Throttled)),
        ]);

        let handle = fx
            .orchestrator
            .ingest(&target(), source("events"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.transport, Transport::Queued);

        fx.clock.advance(Duration::from_secs(30));
        let handle = fx
            .orchestrator
            .ingest(&target(), source("again"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.transport, Transport::Streaming);
    }

    #[tokio::test]
    async fn test_ingest_many_submits_each_uploaded_blob() {
        let fx = fixture(vec![]);

        let result = fx
            .orchestrator
            .ingest_many(
                &target(),
                vec![source("a"), source("b")],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.submitted.len(), 2);
        assert!(result.failures.is_empty());
        assert!(result.cancelled.is_empty());
        assert_eq!(fx.queued.calls(), 2);
        assert!(
            result
                .submitted
                .iter()
                .all(|handle| handle.transport == Transport::Queued)
        );
    }
}
