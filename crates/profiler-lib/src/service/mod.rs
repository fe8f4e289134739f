//! Profiler frontend API
//!
//! The frontend serves the settings document and brokers artifact uploads:
//! a credential request returns a SAS-signed blob URL, the trace is PUT to
//! that URL, and a commit call registers the blob by ETag.

mod client;
pub mod contract;

pub use client::{ClientConfig, ServiceProfilerClient};
pub use contract::{ArtifactAcceptedResponse, BlobAccessPass};

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Artifact upload endpoints used by the upload coordinator
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Obtain a short-lived upload credential for an artifact
    async fn get_upload_access(&self, artifact_id: Uuid, extension: &str) -> Result<BlobAccessPass>;

    /// Upload the gzip-compressed artifact bytes, returning the blob ETag
    async fn upload_blob(
        &self,
        pass: &BlobAccessPass,
        body: Vec<u8>,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String>;

    /// Commit an uploaded artifact
    async fn report_upload_finish(
        &self,
        artifact_id: Uuid,
        extension: &str,
        etag: &str,
    ) -> Result<ArtifactAcceptedResponse>;
}
