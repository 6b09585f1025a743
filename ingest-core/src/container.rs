//! Container selection and upload.
//!
//! Uploads are load-balanced across the interchangeable containers published
//! by the resource cache: a shared round-robin counter spreads the starting
//! points of concurrent uploads, and a failed transfer cycles to the next
//! container in order so that a retry never hammers the same unhealthy
//! backend twice before all others have been tried.

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::{IngestError, TransferError, TransferErrorKind};
use crate::metrics_defs::{CONTAINER_CYCLES, UPLOADS_COMPLETED, UPLOADS_FAILED, UPLOAD_RETRIES};
use crate::resources::{ContainerInfo, ResourceCache};
use crate::retry::RetryPolicy;
use crate::config::UploadConfig;

/// One unit of data to upload. Format-agnostic; the core never inspects the
/// payload.
#[derive(Debug, Clone)]
pub struct IngestSource {
    pub name: String,
    pub data: Bytes,
}

impl IngestSource {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        IngestSource {
            name: name.into(),
            data,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Where an uploaded source landed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub container_url: Url,
    pub object_name: String,
    pub size_bytes: u64,
    pub sas_token: Option<String>,
}

impl BlobRef {
    /// Full address for a follow-up read, credential fragment included.
    pub fn uri(&self) -> String {
        let base = self.container_url.as_str().trim_end_matches('/');
        match &self.sas_token {
            Some(sas) => format!("{}/{}?{}", base, self.object_name, sas),
            None => format!("{}/{}", base, self.object_name),
        }
    }
}

/// Transfers one object to one container. Implemented over the wire
/// elsewhere; must return promptly when the cancellation token fires.
#[async_trait::async_trait]
pub trait BlobTransferClient: Send + Sync {
    async fn transfer(
        &self,
        container: &ContainerInfo,
        object_name: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError>;
}

/// Round-robin start index generator, shared by reference across every
/// uploader drawing from the same container list so that concurrent uploads
/// interleave their starting points.
#[derive(Debug, Default)]
pub struct ContainerSelector {
    counter: AtomicU64,
}

impl ContainerSelector {
    pub fn new() -> Self {
        ContainerSelector {
            counter: AtomicU64::new(0),
        }
    }

    /// Monotonic modulo the container count; unsigned arithmetic makes
    /// counter wraparound harmless. An empty list yields 0 deterministically,
    /// callers reject empty lists separately.
    pub fn next_start_index(&self, container_count: usize) -> usize {
        if container_count == 0 {
            return 0;
        }
        (self.counter.fetch_add(1, Ordering::Relaxed) % container_count as u64) as usize
    }
}

/// Per-source result of a batch upload.
#[derive(Debug)]
pub enum UploadOutcome {
    Success(UploadSuccess),
    Failure(UploadFailure),
    Cancelled { source_name: String },
}

#[derive(Debug)]
pub struct UploadSuccess {
    pub source_name: String,
    pub started_at: Instant,
    pub completed_at: Instant,
    pub blob: BlobRef,
}

#[derive(Debug)]
pub struct UploadFailure {
    pub source_name: String,
    pub started_at: Instant,
    pub completed_at: Instant,
    pub error: IngestError,
    pub is_permanent: bool,
}

/// Aggregate of a batch upload. Both collections are unordered; sibling
/// uploads race freely.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub successes: Vec<UploadSuccess>,
    pub failures: Vec<UploadFailure>,
    pub cancelled: Vec<String>,
}

impl BatchResult {
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }

    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Success(success) => self.successes.push(success),
            UploadOutcome::Failure(failure) => self.failures.push(failure),
            UploadOutcome::Cancelled { source_name } => self.cancelled.push(source_name),
        }
    }
}

/// Uploads sources to containers chosen by the shared selector, cycling to
/// the next container on transient failure.
#[derive(Clone)]
pub struct ContainerUploader {
    resources: Arc<ResourceCache>,
    selector: Arc<ContainerSelector>,
    transfer: Arc<dyn BlobTransferClient>,
    retry: Arc<dyn RetryPolicy>,
    config: UploadConfig,
}

impl ContainerUploader {
    pub fn new(
        resources: Arc<ResourceCache>,
        selector: Arc<ContainerSelector>,
        transfer: Arc<dyn BlobTransferClient>,
        retry: Arc<dyn RetryPolicy>,
        config: UploadConfig,
    ) -> Self {
        ContainerUploader {
            resources,
            selector,
            transfer,
            retry,
            config,
        }
    }

    fn check_preconditions(&self, source: &IngestSource) -> Result<(), IngestError> {
        if source.data.is_empty() {
            return Err(IngestError::SourceEmpty(source.name.clone()));
        }
        if self.config.verify_size_limit && source.size_bytes() > self.config.max_source_size_bytes
        {
            return Err(IngestError::SourceTooLarge {
                name: source.name.clone(),
                size: source.size_bytes(),
                limit: self.config.max_source_size_bytes,
            });
        }
        Ok(())
    }

    fn object_name(source_name: &str) -> String {
        format!("{}_{:016x}", source_name, rand::random::<u64>())
    }

    /// Uploads one source, cycling through containers on transient failure.
    ///
    /// The container list is snapshotted once at the top; a concurrent cache
    /// refresh is only picked up by the next call.
    pub async fn upload(
        &self,
        source: &IngestSource,
        cancel: &CancellationToken,
    ) -> Result<BlobRef, IngestError> {
        self.check_preconditions(source)?;

        let resources = self.resources.get().await?;
        let containers = &resources.containers;
        if containers.is_empty() {
            return Err(IngestError::NoContainersAvailable);
        }

        let object_name = Self::object_name(&source.name);
        let mut index = self.selector.next_start_index(containers.len());
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            attempts += 1;
            let container = &containers[index];
            match self
                .transfer
                .transfer(container, &object_name, source.data.clone(), cancel)
                .await
            {
                Ok(()) => {
                    metrics::counter!(UPLOADS_COMPLETED.name).increment(1);
                    return Ok(BlobRef {
                        container_url: container.base_url.clone(),
                        object_name,
                        size_bytes: source.size_bytes(),
                        sas_token: container.sas_token.clone(),
                    });
                }
                Err(err) if err.kind == TransferErrorKind::Cancelled => {
                    return Err(IngestError::Cancelled);
                }
                Err(err) if err.is_permanent() => {
                    metrics::counter!(UPLOADS_FAILED.name).increment(1);
                    return Err(IngestError::Transfer(err));
                }
                Err(err) => {
                    let decision = self.retry.next_decision(attempts);
                    if !decision.should_retry {
                        metrics::counter!(UPLOADS_FAILED.name).increment(1);
                        return Err(IngestError::RetriesExhausted {
                            source: source.name.clone(),
                            attempts,
                            containers_tried: (attempts as usize).min(containers.len()),
                            last: err,
                        });
                    }

                    tracing::debug!(
                        source = %source.name,
                        container = %container.base_url,
                        attempt = attempts,
                        "transient upload failure, cycling to next container: {err}"
                    );
                    metrics::counter!(UPLOAD_RETRIES.name).increment(1);

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                        _ = tokio::time::sleep(decision.interval) => {}
                    }

                    if containers.len() > 1 {
                        metrics::counter!(CONTAINER_CYCLES.name).increment(1);
                    }
                    index = (index + 1) % containers.len();
                }
            }
        }
    }

    /// Uploads a batch, at most `max_concurrency` sources at a time.
    ///
    /// Best effort per item: one source's failure never aborts its siblings.
    /// When the deadline fires mid-flight, in-flight and unstarted sources
    /// are reported as cancelled rather than failed.
    pub async fn upload_many(
        &self,
        sources: Vec<IngestSource>,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> BatchResult {
        let deadline_at = deadline.map(|d| tokio::time::Instant::now() + d);
        let child = cancel.child_token();
        let mut result = BatchResult::default();

        let chunk_size = self.config.max_concurrency.max(1);
        let mut pending = sources.into_iter();

        loop {
            if child.is_cancelled() {
                break;
            }

            let chunk: Vec<IngestSource> = pending.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for source in chunk {
                let uploader = self.clone();
                let token = child.clone();
                tasks.spawn(async move { uploader.upload_outcome(source, &token).await });
            }

            loop {
                tokio::select! {
                    _ = sleep_until_deadline(deadline_at), if !child.is_cancelled() => {
                        tracing::warn!("batch deadline reached, cancelling in-flight uploads");
                        child.cancel();
                    }
                    joined = tasks.join_next() => match joined {
                        Some(Ok(outcome)) => result.record(outcome),
                        Some(Err(err)) => tracing::error!("upload task panicked: {err}"),
                        None => break,
                    }
                }
            }
        }

        // Sources never started still count as cancelled, not failed.
        result.cancelled.extend(pending.map(|source| source.name));
        result
    }

    async fn upload_outcome(
        &self,
        source: IngestSource,
        cancel: &CancellationToken,
    ) -> UploadOutcome {
        let started_at = Instant::now();
        match self.upload(&source, cancel).await {
            Ok(blob) => UploadOutcome::Success(UploadSuccess {
                source_name: source.name,
                started_at,
                completed_at: Instant::now(),
                blob,
            }),
            Err(IngestError::Cancelled) => UploadOutcome::Cancelled {
                source_name: source.name,
            },
            Err(error) => UploadOutcome::Failure(UploadFailure {
                is_permanent: error.is_permanent(),
                source_name: source.name,
                started_at,
                completed_at: Instant::now(),
                error,
            }),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
