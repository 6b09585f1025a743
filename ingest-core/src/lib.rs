//! Resilience core for pushing data into a remote analytical store.
//!
//! The crate decides *how* and *where* a unit of data is delivered once a
//! caller supplies it: a per-target state machine picks between the streaming
//! and queued transports, uploads are load-balanced and cycled across
//! interchangeable storage containers, transient failures go through a
//! configurable retry policy, and the container list itself comes from a
//! refreshing cache that shields the remote configuration endpoint from
//! redundant concurrent fetches.
//!
//! All network I/O is behind injected traits ([`ResourceFetcher`],
//! [`BlobTransferClient`], [`StreamingSubmitClient`], [`QueuedSubmitClient`]);
//! the companion `ingest-http` crate provides reqwest-backed implementations.

pub mod clock;
pub mod config;
pub mod container;
pub mod errors;
pub mod metrics_defs;
pub mod orchestrator;
pub mod resources;
pub mod retry;
pub mod streaming_policy;
pub mod testutils;

pub use clock::{Clock, SystemClock};
pub use config::IngestConfig;
pub use container::{
    BatchResult, BlobRef, BlobTransferClient, ContainerSelector, ContainerUploader, IngestSource,
    UploadOutcome,
};
pub use errors::{
    ErrorCategory, FetchError, IngestError, Result, SubmitError, TransferError, TransferErrorKind,
};
pub use orchestrator::{
    BatchIngestResult, IngestionOrchestrator, QueuedSubmitClient, StreamingSubmitClient,
    SubmissionHandle, Transport,
};
pub use resources::{ContainerInfo, IngestionResources, ResourceCache, ResourceFetcher};
pub use retry::{BackoffRetryPolicy, NoRetryPolicy, RetryDecision, RetryPolicy};
pub use streaming_policy::{IngestTarget, ManagedStreamingPolicy};
