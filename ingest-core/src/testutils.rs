//! Deterministic fakes shared by the crate's unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::clock::Clock;
use crate::container::BlobTransferClient;
use crate::errors::{FetchError, TransferError};
use crate::resources::{ContainerInfo, IngestionResources, ResourceFetcher};

/// Manually advanced monotonic clock.
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        ManualClock::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// Builds a resource document from container URL literals.
pub fn resources(container_urls: &[&str]) -> IngestionResources {
    IngestionResources {
        containers: container_urls
            .iter()
            .map(|u| ContainerInfo::new(Url::parse(u).unwrap()))
            .collect(),
        refresh_hint: None,
    }
}

/// Fetcher that counts calls and can be flipped into a failing state.
///
/// In `distinct_per_call` mode every fetch returns a different container
/// list, which lets tests tell apart which fetch result won an install race.
pub struct CountingFetcher {
    template: Option<IngestionResources>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingFetcher {
    pub fn new(template: IngestionResources) -> Self {
        CountingFetcher {
            template: Some(template),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn distinct_per_call() -> Self {
        CountingFetcher {
            template: None,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceFetcher for CountingFetcher {
    async fn fetch(&self) -> Result<IngestionResources, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::new("fetcher set to fail"));
        }
        match &self.template {
            Some(template) => Ok(template.clone()),
            None => Ok(resources(&[format!("http://generation-{call}").as_str()])),
        }
    }
}

type TransferScript = dyn Fn(&ContainerInfo) -> Result<(), TransferError> + Send + Sync;

/// Scripted transfer client recording the container chosen for every call.
pub struct FakeTransferClient {
    script: Box<TransferScript>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransferClient {
    fn new(script: Box<TransferScript>) -> Self {
        FakeTransferClient {
            script,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_succeed() -> Self {
        FakeTransferClient::new(Box::new(|_| Ok(())))
    }

    pub fn always_transient() -> Self {
        FakeTransferClient::new(Box::new(|_| Err(TransferError::transient("injected 503"))))
    }

    pub fn always_permanent() -> Self {
        FakeTransferClient::new(Box::new(|_| Err(TransferError::permanent("injected 403"))))
    }

    /// Transient failure for the named container URLs, success elsewhere.
    pub fn fail_transient_for(container_urls: &[&str]) -> Self {
        let unhealthy: HashSet<String> = container_urls.iter().map(|u| u.to_string()).collect();
        FakeTransferClient::new(Box::new(move |container| {
            if unhealthy.contains(container.base_url.as_str()) {
                Err(TransferError::transient("injected 503"))
            } else {
                Ok(())
            }
        }))
    }

    /// Sleep before responding, so batch deadline tests have something to
    /// interrupt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BlobTransferClient for FakeTransferClient {
    async fn transfer(
        &self,
        container: &ContainerInfo,
        _object_name: &str,
        _data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.calls.lock().push(container.base_url.as_str().to_string());

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        (self.script)(container)
    }
}

/// Wraps a clock in an `Arc<dyn Clock>` alongside a handle for advancing it.
pub fn manual_clock() -> (Arc<ManualClock>, Arc<dyn Clock>) {
    let clock = Arc::new(ManualClock::new());
    let as_dyn: Arc<dyn Clock> = clock.clone();
    (clock, as_dyn)
}
