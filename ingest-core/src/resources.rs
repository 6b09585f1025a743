//! Ingestion resource cache.
//!
//! The remote service publishes a small document describing which storage
//! containers currently accept uploads and how often the document should be
//! refreshed. The cache serves that document to any number of concurrent
//! callers while triggering at most one fetch per stale read, and keeps
//! serving the previous value when a refresh fails.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::clock::Clock;
use crate::errors::{FetchError, IngestError};
use crate::metrics_defs::{
    RESOURCE_REFRESH_DISCARDED, RESOURCE_REFRESHES, RESOURCE_STALE_SERVES,
};

/// One interchangeable storage container accepting uploaded source data.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub base_url: Url,
    pub sas_token: Option<String>,
}

impl ContainerInfo {
    pub fn new(base_url: Url) -> Self {
        ContainerInfo {
            base_url,
            sas_token: None,
        }
    }

    pub fn with_sas_token(mut self, sas_token: impl Into<String>) -> Self {
        self.sas_token = Some(sas_token.into());
        self
    }

    /// Full address of an object in this container, including the credential
    /// fragment when one is present.
    pub fn object_url(&self, object_name: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        match &self.sas_token {
            Some(sas) => format!("{base}/{object_name}?{sas}"),
            None => format!("{base}/{object_name}"),
        }
    }
}

/// The configuration document served by the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionResources {
    pub containers: Vec<ContainerInfo>,
    /// Server-supplied refresh hint; the cache uses the smaller of this and
    /// its configured default.
    pub refresh_hint: Option<Duration>,
}

/// Fetches the resource document from the remote source. May fail; retrying
/// is the fetcher's own responsibility, the cache never retries internally.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self) -> Result<IngestionResources, FetchError>;
}

/// Cache entry, replaced atomically as a whole so readers never observe a
/// torn triple.
#[derive(Debug)]
struct CachedResources {
    value: Arc<IngestionResources>,
    fetched_at: Instant,
    effective_refresh_interval: Duration,
}

impl CachedResources {
    fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.fetched_at) >= self.effective_refresh_interval
    }
}

pub struct ResourceCache {
    fetcher: Arc<dyn ResourceFetcher>,
    clock: Arc<dyn Clock>,
    default_refresh_interval: Duration,
    current: RwLock<Option<Arc<CachedResources>>>,
}

impl ResourceCache {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        clock: Arc<dyn Clock>,
        default_refresh_interval: Duration,
    ) -> Self {
        ResourceCache {
            fetcher,
            clock,
            default_refresh_interval,
            current: RwLock::new(None),
        }
    }

    /// Returns the current resource document, refreshing it when stale.
    ///
    /// Concurrent stale reads may each trigger a fetch, but only the first
    /// result to come back while the slot is unchanged is installed; the
    /// others are discarded in favor of the winner. A failed refresh falls
    /// back to the previous value when one exists.
    pub async fn get(&self) -> Result<Arc<IngestionResources>, IngestError> {
        let observed = self.current.read().clone();

        if let Some(cached) = &observed
            && !cached.is_stale(self.clock.now())
        {
            return Ok(cached.value.clone());
        }

        match self.fetcher.fetch().await {
            Ok(fresh) => Ok(self.install(observed, fresh)),
            Err(err) => match observed {
                Some(cached) => {
                    tracing::warn!("resource refresh failed, serving stale value: {err}");
                    metrics::counter!(RESOURCE_STALE_SERVES.name).increment(1);
                    Ok(cached.value.clone())
                }
                None => Err(err.into()),
            },
        }
    }

    /// Compare-and-swap of the cache slot against the entry observed before
    /// the fetch. Losing the race means a concurrent caller already
    /// installed a newer value; the just-fetched document is dropped and the
    /// winner is returned instead.
    fn install(
        &self,
        observed: Option<Arc<CachedResources>>,
        fresh: IngestionResources,
    ) -> Arc<IngestionResources> {
        let effective_refresh_interval = match fresh.refresh_hint {
            Some(hint) => hint.min(self.default_refresh_interval),
            None => self.default_refresh_interval,
        };
        let entry = Arc::new(CachedResources {
            value: Arc::new(fresh),
            fetched_at: self.clock.now(),
            effective_refresh_interval,
        });

        let mut slot = self.current.write();
        let unchanged = match (&*slot, &observed) {
            (None, None) => true,
            (Some(current), Some(observed)) => Arc::ptr_eq(current, observed),
            _ => false,
        };

        if unchanged {
            *slot = Some(entry.clone());
            metrics::counter!(RESOURCE_REFRESHES.name).increment(1);
            return entry.value.clone();
        }

        metrics::counter!(RESOURCE_REFRESH_DISCARDED.name).increment(1);
        match &*slot {
            Some(winner) => winner.value.clone(),
            // Nothing else ever clears the slot, so a lost race always
            // leaves a winner behind; keep our own value if not.
            None => {
                *slot = Some(entry.clone());
                entry.value.clone()
            }
        }
    }
}
