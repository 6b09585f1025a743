//! HTTP submission clients for the streaming and queued transports.
//!
//! Streaming failures carry an optional error code in the response body;
//! that code, together with the status, maps onto the core's
//! [`ErrorCategory`] so the managed streaming policy can react to it.

use async_trait::async_trait;
use ingest_core::container::{BlobRef, IngestSource};
use ingest_core::errors::{ErrorCategory, SubmitError};
use ingest_core::orchestrator::{QueuedSubmitClient, StreamingSubmitClient};
use ingest_core::streaming_policy::IngestTarget;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

fn categorize(status: StatusCode, code: Option<&str>) -> ErrorCategory {
    match code {
        Some("StreamingIngestionOff") => ErrorCategory::StreamingIngestionOff,
        Some("TableConfigurationPreventsStreaming") => {
            ErrorCategory::TableConfigurationPreventsStreaming
        }
        _ if status == StatusCode::TOO_MANY_REQUESTS => ErrorCategory::Throttled,
        _ => ErrorCategory::Other,
    }
}

fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

async fn submit_error(response: reqwest::Response, context: &str) -> SubmitError {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.ok();
    let code = body.and_then(|b| b.code);

    SubmitError {
        category: categorize(status, code.as_deref()),
        permanent: is_permanent(status),
        message: match code {
            Some(code) => format!("{context} returned {status} ({code})"),
            None => format!("{context} returned {status}"),
        },
    }
}

/// Posts a source straight to the streaming endpoint.
pub struct HttpStreamingSubmitClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStreamingSubmitClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpStreamingSubmitClient {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, target: &IngestTarget) -> String {
        format!(
            "{}/streaming/{}/{}",
            self.base_url.trim_end_matches('/'),
            target.database,
            target.table
        )
    }
}

#[async_trait]
impl StreamingSubmitClient for HttpStreamingSubmitClient {
    async fn submit(
        &self,
        target: &IngestTarget,
        source: &IngestSource,
        cancel: &CancellationToken,
    ) -> Result<(), SubmitError> {
        let url = self.url(target);
        let request = self.client.post(&url).body(source.data.clone());

        tokio::select! {
            _ = cancel.cancelled() => Err(SubmitError::transient("streaming submission cancelled")),
            result = request.send() => match result {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(submit_error(response, "streaming endpoint").await),
                Err(err) => Err(SubmitError::transient(format!(
                    "streaming request to {url} failed: {err}"
                ))),
            }
        }
    }
}

/// Enqueues an uploaded blob for asynchronous ingestion.
pub struct HttpQueuedSubmitClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQueuedSubmitClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpQueuedSubmitClient {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, target: &IngestTarget) -> String {
        format!(
            "{}/queued/{}/{}",
            self.base_url.trim_end_matches('/'),
            target.database,
            target.table
        )
    }
}

#[async_trait]
impl QueuedSubmitClient for HttpQueuedSubmitClient {
    async fn submit(
        &self,
        target: &IngestTarget,
        blob: &BlobRef,
        cancel: &CancellationToken,
    ) -> Result<(), SubmitError> {
        let url = self.url(target);
        let request = self.client.post(&url).json(&serde_json::json!({
            "blob_uri": blob.uri(),
            "size_bytes": blob.size_bytes,
        }));

        tokio::select! {
            _ = cancel.cancelled() => Err(SubmitError::transient("queued submission cancelled")),
            result = request.send() => match result {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(submit_error(response, "queued endpoint").await),
                Err(err) => Err(SubmitError::transient(format!(
                    "queued request to {url} failed: {err}"
                ))),
            }
        }
    }
}
