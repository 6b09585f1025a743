use async_trait::async_trait;
use bytes::Bytes;
use ingest_core::container::BlobTransferClient;
use ingest_core::errors::TransferError;
use ingest_core::resources::ContainerInfo;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

/// Uploads one object to one container with an HTTP PUT.
#[derive(Clone, Default)]
pub struct HttpBlobTransferClient {
    client: reqwest::Client,
}

impl HttpBlobTransferClient {
    pub fn new() -> Self {
        HttpBlobTransferClient {
            client: reqwest::Client::new(),
        }
    }
}

fn classify_status(status: StatusCode) -> TransferError {
    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();

    let error = if transient {
        TransferError::transient(format!("container returned {status}"))
    } else {
        TransferError::permanent(format!("container rejected upload with {status}"))
    };
    error.with_status(status)
}

#[async_trait]
impl BlobTransferClient for HttpBlobTransferClient {
    async fn transfer(
        &self,
        container: &ContainerInfo,
        object_name: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let url = container.object_url(object_name);
        let request = self.client.put(&url).body(data);

        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::cancelled()),
            result = request.send() => match result {
                Ok(response) if response.status().is_success() => Ok(()),
                Ok(response) => Err(classify_status(response.status())),
                Err(err) => Err(TransferError::transient(format!(
                    "transfer to {url} failed: {err}"
                ))),
            }
        }
    }
}
