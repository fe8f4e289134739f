//! Upload protocol driver
//!
//! A finished trace is checked for a complete identity, gzipped, then goes
//! through three network steps, each under its own retry budget: credential
//! request, blob upload and commit. Only after the commit is accepted is an
//! index entry built and published. The trace file is removed afterwards
//! whatever the outcome, unless configured otherwise.

use super::context::{UploadContext, UploadContextBuilder};
use super::index::{keys, ServiceProfilerIndex, TRACE_EXTENSION};
use super::os_platform::os_platform_description;
use super::retry::{Exhausted, RetryBudget, RetryPolicy};
use crate::error::{UploadError, UploadStage};
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::service::contract::{blob_metadata, format_wire_timestamp};
use crate::service::{ArtifactAcceptedResponse, ArtifactService, BlobAccessPass};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Identity attached to every uploaded artifact
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub machine_name: String,
    pub process_id: String,
    /// Cloud role name, omitted from blob metadata when empty
    pub role_name: Option<String>,
    /// Application id the artifacts belong to
    pub data_cube: String,
    /// Keep trace files on disk after upload
    pub retain_trace_files: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            machine_name: "localhost".to_string(),
            process_id: std::process::id().to_string(),
            role_name: None,
            data_cube: String::new(),
            retain_trace_files: false,
        }
    }
}

/// Destination of committed index entries
#[async_trait]
pub trait IndexPublisher: Send + Sync {
    async fn publish(&self, index: &ServiceProfilerIndex) -> anyhow::Result<()>;
}

/// Publishes index entries as structured log events
#[derive(Debug, Default, Clone)]
pub struct LoggingIndexPublisher;

#[async_trait]
impl IndexPublisher for LoggingIndexPublisher {
    async fn publish(&self, index: &ServiceProfilerIndex) -> anyhow::Result<()> {
        let entry = serde_json::to_string(index)?;
        info!(event = "service_profiler_index", index = %entry, "Profile index published");
        Ok(())
    }
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub accepted: ArtifactAcceptedResponse,
    pub index: ServiceProfilerIndex,
}

pub struct UploadCoordinator {
    service: Arc<dyn ArtifactService>,
    publisher: Arc<dyn IndexPublisher>,
    config: UploadConfig,
    credentials_retry: RetryBudget,
    upload_retry: RetryBudget,
    commit_retry: RetryBudget,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    metrics: AgentMetrics,
}

impl UploadCoordinator {
    pub fn new(
        service: Arc<dyn ArtifactService>,
        publisher: Arc<dyn IndexPublisher>,
        config: UploadConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            publisher,
            config,
            credentials_retry: RetryBudget::new(retry.clone()),
            upload_retry: RetryBudget::new(retry.clone()),
            commit_retry: RetryBudget::new(retry),
            health: None,
            logger: None,
            metrics: AgentMetrics::new(),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Context builder carrying this agent's identity
    pub fn context_builder(&self) -> UploadContextBuilder {
        UploadContext::builder()
            .machine_name(self.config.machine_name.as_str())
            .data_cube(self.config.data_cube.as_str())
            .file_format(TRACE_EXTENSION)
    }

    /// Upload a finished trace and publish its index entry
    pub async fn upload(&self, context: UploadContext) -> Result<UploadOutcome, UploadError> {
        let started = Instant::now();
        let profile_id = context.profile_id.to_string();

        let result = self.run_protocol(&context).await;

        if !self.config.retain_trace_files {
            remove_trace_file(&context.trace_file).await;
        }

        match &result {
            Ok(outcome) => {
                self.metrics.inc_uploads_completed();
                self.metrics.observe_upload_latency(started.elapsed());
                if let Some(logger) = &self.logger {
                    logger.log_upload_completed(
                        &profile_id,
                        &outcome.accepted.stamp_id,
                        &outcome.accepted.blob_uri,
                    );
                }
                if let Some(health) = &self.health {
                    health.set_healthy(components::UPLOADER).await;
                }
            }
            Err(error) => {
                self.metrics.inc_upload_failures(error.stage().as_label());
                match &self.logger {
                    Some(logger) => {
                        logger.log_upload_failed(&profile_id, &error.stage().to_string(), &error.to_string())
                    }
                    None => warn!(profile_id = %profile_id, error = %error, "Trace upload abandoned"),
                }
                if let Some(health) = &self.health {
                    health.record_failure(components::UPLOADER, error.to_string()).await;
                }
            }
        }

        result
    }

    async fn run_protocol(&self, context: &UploadContext) -> Result<UploadOutcome, UploadError> {
        self.check_identity(context)?;

        let trace_error = |source| UploadError::TraceFile {
            path: context.trace_file.clone(),
            source,
        };
        let raw = tokio::fs::read(&context.trace_file).await.map_err(trace_error)?;
        let raw_len = raw.len();
        let body = compress_trace(raw).await.map_err(trace_error)?;

        let service = &self.service;
        let profile_id = context.profile_id;
        let extension = context.file_format.as_str();

        let pass = self
            .credentials_retry
            .run("credential request", || service.get_upload_access(profile_id, extension))
            .await
            .map_err(|e| stage_error(UploadStage::Credentials, e))?;

        debug!(
            profile_id = %profile_id,
            blob = %pass.redacted_url(),
            bytes = raw_len,
            compressed = body.len(),
            "Upload access granted"
        );

        let etag = self.upload_blob(&pass, body, context).await?;

        let accepted = self
            .commit_retry
            .run("commit", || service.report_upload_finish(profile_id, extension, &etag))
            .await
            .map_err(|e| stage_error(UploadStage::Commit, e))?;

        let index = self.build_index(context, &accepted)?;

        self.publisher
            .publish(&index)
            .await
            .map_err(|error| UploadError::Stage {
                stage: UploadStage::Index,
                attempts: 1,
                error,
            })?;

        Ok(UploadOutcome { accepted, index })
    }

    /// Refuse to start the protocol when the artifact could never be indexed
    fn check_identity(&self, context: &UploadContext) -> Result<(), UploadError> {
        let identity = [
            (keys::DATA_CUBE, context.data_cube.as_str()),
            (keys::MACHINE_NAME, context.machine_name.as_str()),
            (keys::PROCESS_ID, self.config.process_id.as_str()),
            (keys::EXTENSION, context.file_format.as_str()),
        ];

        match identity.into_iter().find(|(_, value)| value.trim().is_empty()) {
            Some((key, _)) => Err(UploadError::MissingIdentity(key)),
            None => Ok(()),
        }
    }

    async fn upload_blob(
        &self,
        pass: &BlobAccessPass,
        body: Vec<u8>,
        context: &UploadContext,
    ) -> Result<String, UploadError> {
        let service = &self.service;
        let metadata = self.blob_metadata(context);

        self.upload_retry
            .run("blob upload", || service.upload_blob(pass, body.clone(), &metadata))
            .await
            .map_err(|e| stage_error(UploadStage::Upload, e))
    }

    fn blob_metadata(&self, context: &UploadContext) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            blob_metadata::DATA_CUBE.to_string(),
            context.data_cube.to_lowercase(),
        );
        metadata.insert(
            blob_metadata::MACHINE_NAME.to_string(),
            context.machine_name.clone(),
        );
        metadata.insert(
            blob_metadata::START_TIME.to_string(),
            format_wire_timestamp(&context.session_start),
        );
        metadata.insert(
            blob_metadata::PROGRAMMING_LANGUAGE.to_string(),
            blob_metadata::PROGRAMMING_LANGUAGE_JAVA.to_string(),
        );
        metadata.insert(
            blob_metadata::OS_PLATFORM.to_string(),
            os_platform_description().to_string(),
        );
        metadata.insert(
            blob_metadata::TRACE_FILE_FORMAT.to_string(),
            context.file_format.clone(),
        );

        if let Some(role) = self.config.role_name.as_deref().filter(|r| !r.is_empty()) {
            metadata.insert(blob_metadata::ROLE_NAME.to_string(), role.to_string());
        }

        metadata
    }

    fn build_index(
        &self,
        context: &UploadContext,
        accepted: &ArtifactAcceptedResponse,
    ) -> Result<ServiceProfilerIndex, UploadError> {
        ServiceProfilerIndex::builder()
            .source(context.trigger_name())
            .stamp_id(accepted.stamp_id.as_str())
            .data_cube(context.data_cube.to_lowercase())
            .machine_name(context.machine_name.as_str())
            .process_id(self.config.process_id.as_str())
            .operating_system(os_platform_description())
            .artifact_id(context.profile_id.to_string())
            .extension(context.file_format.as_str())
            .etl_file_session_id(session_id_timestamp(&accepted.accepted_time))
            .cpu_usage(context.usage.cpu)
            .memory_usage(context.usage.memory)
            .build()
    }
}

fn stage_error(stage: UploadStage, exhausted: Exhausted<anyhow::Error>) -> UploadError {
    UploadError::Stage {
        stage,
        attempts: exhausted.attempts,
        error: exhausted.error,
    }
}

/// Gzip a trace on the blocking pool
async fn compress_trace(raw: Vec<u8>) -> std::io::Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::default());
        encoder.write_all(&raw)?;
        encoder.finish()
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

/// Accepted time re-rendered with seven fractional digits
fn session_id_timestamp(accepted_time: &str) -> String {
    match DateTime::parse_from_rfc3339(accepted_time) {
        Ok(parsed) => format_wire_timestamp(&parsed.with_timezone(&Utc)),
        Err(_) => accepted_time.to_string(),
    }
}

async fn remove_trace_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Trace file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove trace file"),
    }
}
