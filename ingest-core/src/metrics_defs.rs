//! Metric definitions for the ingestion core.

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub description: &'static str,
}

pub const UPLOAD_RETRIES: MetricDef = MetricDef {
    name: "ingest.upload.retries",
    description: "Transient upload failures that led to a retry",
};

pub const CONTAINER_CYCLES: MetricDef = MetricDef {
    name: "ingest.upload.container_cycles",
    description: "Times an upload moved on to the next container after a failure",
};

pub const UPLOADS_COMPLETED: MetricDef = MetricDef {
    name: "ingest.upload.completed",
    description: "Successful container uploads",
};

pub const UPLOADS_FAILED: MetricDef = MetricDef {
    name: "ingest.upload.failed",
    description: "Container uploads that surfaced an error to the caller",
};

pub const RESOURCE_REFRESHES: MetricDef = MetricDef {
    name: "ingest.resources.refreshes",
    description: "Successful ingestion resource refreshes installed in the cache",
};

pub const RESOURCE_REFRESH_DISCARDED: MetricDef = MetricDef {
    name: "ingest.resources.refresh_discarded",
    description: "Fetched resource documents discarded because a concurrent refresh won",
};

pub const RESOURCE_STALE_SERVES: MetricDef = MetricDef {
    name: "ingest.resources.stale_serves",
    description: "Reads served from a stale cache entry after a refresh failure",
};

pub const STREAMING_DISQUALIFIED: MetricDef = MetricDef {
    name: "ingest.streaming.disqualified",
    description: "Targets moved to the queued transport by a disqualifying error. Tagged by category.",
};

pub const STREAMING_FALLBACKS: MetricDef = MetricDef {
    name: "ingest.streaming.fallbacks",
    description: "Ingestions that fell back from streaming to the queued transport",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPLOAD_RETRIES,
    CONTAINER_CYCLES,
    UPLOADS_COMPLETED,
    UPLOADS_FAILED,
    RESOURCE_REFRESHES,
    RESOURCE_REFRESH_DISCARDED,
    RESOURCE_STALE_SERVES,
    STREAMING_DISQUALIFIED,
    STREAMING_FALLBACKS,
];
