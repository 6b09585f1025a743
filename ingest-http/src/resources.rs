const BASE_DELAY: u64 = 500;

use async_trait::async_trait;
use ingest_core::errors::FetchError;
use ingest_core::resources::{ContainerInfo, IngestionResources, ResourceFetcher};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

#[derive(Deserialize)]
struct ContainerRecord {
    url: Url,
    sas_token: Option<String>,
}

#[derive(Deserialize)]
struct ResourcesDocument {
    containers: Vec<ContainerRecord>,
    refresh_interval_secs: Option<u64>,
}

impl ResourcesDocument {
    fn into_resources(self) -> IngestionResources {
        IngestionResources {
            containers: self
                .containers
                .into_iter()
                .map(|record| ContainerInfo {
                    base_url: record.url,
                    sas_token: record.sas_token,
                })
                .collect(),
            refresh_hint: self.refresh_interval_secs.map(Duration::from_secs),
        }
    }
}

/// Fetches the ingestion resource document over HTTP.
///
/// Retrying on retriable statuses happens here, with exponential backoff;
/// the resource cache itself never retries a fetch.
pub struct HttpResourceFetcher {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpResourceFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        HttpResourceFetcher {
            client: reqwest::Client::new(),
            url: url.into(),
            max_retries: 3,
            base_delay: Duration::from_millis(BASE_DELAY),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self) -> Result<IngestionResources, FetchError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let mut retries = 0;

        loop {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|err| FetchError::new(format!("request to {} failed: {err}", self.url)))?;

            if !response.status().is_success() {
                if RETRIABLE_STATUS_CODES.contains(&response.status()) && retries < self.max_retries
                {
                    // Backoff between retries
                    let retry_millis = self.base_delay.as_millis() as u64 * 2_u64.pow(retries);
                    sleep(Duration::from_millis(retry_millis)).await;
                    retries += 1;
                    continue;
                }
                return Err(FetchError::new(format!(
                    "resource endpoint returned {} for {}",
                    response.status(),
                    self.url
                )));
            }

            let document = response
                .json::<ResourcesDocument>()
                .await
                .map_err(|err| FetchError::new(format!("invalid resource document: {err}")))?;

            tracing::debug!(
                containers = document.containers.len(),
                "fetched ingestion resources"
            );
            return Ok(document.into_resources());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn document_body() -> &'static str {
        r#"{
            "containers": [
                {"url": "http://c1.blob.example.com/ingest", "sas_token": "sig=abc"},
                {"url": "http://c2.blob.example.com/ingest"}
            ],
            "refresh_interval_secs": 600
        }"#
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_string(document_body()))
            .mount(&mock_server)
            .await;

        let fetcher = HttpResourceFetcher::new(format!("{}/resources", mock_server.uri()));
        let resources = fetcher.fetch().await.unwrap();

        assert_eq!(resources.containers.len(), 2);
        assert_eq!(
            resources.containers[0].sas_token.as_deref(),
            Some("sig=abc")
        );
        assert!(resources.containers[1].sas_token.is_none());
        assert_eq!(resources.refresh_hint, Some(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn test_retriable_status_is_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_string(document_body()))
            .mount(&mock_server)
            .await;

        let fetcher = HttpResourceFetcher::new(format!("{}/resources", mock_server.uri()))
            .with_retries(3, Duration::from_millis(10));
        let resources = fetcher.fetch().await.unwrap();

        assert_eq!(resources.containers.len(), 2);
    }

    #[tokio::test]
    async fn test_non_retriable_status_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = HttpResourceFetcher::new(format!("{}/resources", mock_server.uri()));
        let err = fetcher.fetch().await.unwrap_err();

        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let fetcher = HttpResourceFetcher::new(format!("{}/resources", mock_server.uri()))
            .with_retries(2, Duration::from_millis(5));
        let err = fetcher.fetch().await.unwrap_err();

        assert!(err.to_string().contains("503"));
    }
}
