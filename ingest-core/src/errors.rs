use http::StatusCode;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Classification of a streaming submission failure.
///
/// Only the first three categories disqualify a target from streaming; they
/// move it to the queued transport for a cooldown period. `Other` covers
/// ordinary transient/permanent transport errors and never changes transport
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    StreamingIngestionOff,
    TableConfigurationPreventsStreaming,
    Throttled,
    Other,
}

impl ErrorCategory {
    pub fn disqualifies_streaming(&self) -> bool {
        !matches!(self, ErrorCategory::Other)
    }
}

/// Whether a failed blob transfer is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// Network failure, 5xx-class status, throttling. Eligible for retry and
    /// container cycling.
    Transient,
    /// 4xx-class rejection or malformed input. Never retried.
    Permanent,
    /// The caller's cancellation signal fired mid-transfer.
    Cancelled,
}

/// Error returned by a [`BlobTransferClient`](crate::container::BlobTransferClient).
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TransferError {
    pub kind: TransferErrorKind,
    pub status: Option<StatusCode>,
    pub message: String,
}

impl TransferError {
    pub fn transient(message: impl Into<String>) -> Self {
        TransferError {
            kind: TransferErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        TransferError {
            kind: TransferErrorKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        TransferError {
            kind: TransferErrorKind::Cancelled,
            status: None,
            message: "transfer cancelled".into(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == TransferErrorKind::Permanent
    }
}

/// Error returned by a resource fetcher when the remote configuration
/// document could not be retrieved.
#[derive(Error, Debug, Clone)]
#[error("resource fetch failed: {message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        FetchError {
            message: message.into(),
        }
    }
}

/// Error returned by a streaming or queued submission client.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct SubmitError {
    pub category: ErrorCategory,
    pub permanent: bool,
    pub message: String,
}

impl SubmitError {
    pub fn transient(message: impl Into<String>) -> Self {
        SubmitError {
            category: ErrorCategory::Other,
            permanent: false,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SubmitError {
            category: ErrorCategory::Other,
            permanent: true,
            message: message.into(),
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }
}

/// Errors surfaced by the ingestion core.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source '{0}' is empty")]
    SourceEmpty(String),

    #[error("source '{name}' is {size} bytes, exceeding the {limit} byte limit")]
    SourceTooLarge { name: String, size: u64, limit: u64 },

    #[error("no storage containers available")]
    NoContainersAvailable,

    #[error(
        "upload of '{source}' failed after {attempts} attempts across \
         {containers_tried} containers: {last}"
    )]
    RetriesExhausted {
        source: String,
        attempts: u32,
        containers_tried: usize,
        #[source]
        last: TransferError,
    },

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    ResourceFetch(#[from] FetchError),

    #[error("submission failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("operation cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            IngestError::SourceEmpty(_)
            | IngestError::SourceTooLarge { .. }
            | IngestError::NoContainersAvailable => true,
            IngestError::Transfer(err) => err.is_permanent(),
            IngestError::Submit(err) => err.permanent,
            IngestError::RetriesExhausted { .. }
            | IngestError::ResourceFetch(_)
            | IngestError::Cancelled => false,
        }
    }
}
