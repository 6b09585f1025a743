//! HTTP implementations of the ingest-core collaborator traits.
//!
//! Everything here is wire plumbing: fetching the resource document,
//! transferring blobs to containers, and posting streaming/queued
//! submissions, each mapped into the core's error taxonomy.

pub mod resources;
pub mod submit;
pub mod transfer;

pub use resources::HttpResourceFetcher;
pub use submit::{HttpQueuedSubmitClient, HttpStreamingSubmitClient};
pub use transfer::HttpBlobTransferClient;
