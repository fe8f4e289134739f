//! Glue between trigger decisions, the capture subsystem and the uploader
//!
//! `ProfilerService` is the engine's `TriggerHandler`. Each trigger spawns a
//! task that runs the capture while holding the session guard, releases the
//! session once the trace is on disk, then uploads it. Upload time never
//! counts against the session or blocks sampling.

use crate::alerting::{ActiveSession, TriggerHandler, TriggerRequest, UsageAverages};
use crate::error::UploadError;
use crate::health::{components, HealthRegistry};
use crate::upload::index::TRACE_EXTENSION;
use crate::upload::{UploadContext, UploadCoordinator, UploadOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Extra time a capture may take beyond its requested duration
pub const CAPTURE_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Produces a trace file for a trigger
#[async_trait]
pub trait CaptureSubsystem: Send + Sync {
    /// Record for `request.duration` and return the finished trace file
    async fn capture(&self, request: &TriggerRequest) -> Result<PathBuf>;
}

pub struct ProfilerService {
    capture: Arc<dyn CaptureSubsystem>,
    uploader: Arc<UploadCoordinator>,
    runtime: Handle,
    health: Option<HealthRegistry>,
    in_flight: Mutex<JoinSet<()>>,
}

impl ProfilerService {
    pub fn new(capture: Arc<dyn CaptureSubsystem>, uploader: Arc<UploadCoordinator>, runtime: Handle) -> Self {
        Self {
            capture,
            uploader,
            runtime,
            health: None,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Hand a finished trace to the uploader
    pub async fn complete_session(
        &self,
        request: &TriggerRequest,
        trace_file: PathBuf,
        usage: UsageAverages,
    ) -> Result<UploadOutcome, UploadError> {
        complete_session(&self.uploader, request, trace_file, usage).await
    }

    /// Number of captures and uploads still running
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    /// Wait for running captures and uploads to finish
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_in_flight());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Profiling task failed");
            }
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TriggerHandler for ProfilerService {
    fn on_trigger(&self, request: TriggerRequest, session: ActiveSession) {
        let capture = self.capture.clone();
        let uploader = self.uploader.clone();
        let health = self.health.clone();

        let task = async move {
            let deadline = request.duration + CAPTURE_GRACE_PERIOD;
            let captured = tokio::time::timeout(deadline, capture.capture(&request))
                .await
                .with_context(|| format!("Capture did not finish within {}s", deadline.as_secs()))
                .and_then(|result| result);

            let usage = session.usage_averages();
            drop(session);

            let trace_file = match captured {
                Ok(path) => path,
                Err(e) => {
                    warn!(profile_id = %request.profile_id, error = %e, "Capture failed");
                    if let Some(health) = &health {
                        health.record_failure(components::TRIGGER_ENGINE, format!("{:#}", e)).await;
                    }
                    return;
                }
            };

            if let Some(health) = &health {
                health.set_healthy(components::TRIGGER_ENGINE).await;
            }
            debug!(profile_id = %request.profile_id, path = %trace_file.display(), "Capture finished");

            if let Ok(outcome) = complete_session(&uploader, &request, trace_file, usage).await {
                info!(
                    profile_id = %request.profile_id,
                    stamp_id = %outcome.accepted.stamp_id,
                    "Profile delivered"
                );
            }
        };

        let mut tasks = self.lock_in_flight();
        // Reap finished tasks so the set does not grow without bound
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(task, &self.runtime);
    }
}

async fn complete_session(
    uploader: &UploadCoordinator,
    request: &TriggerRequest,
    trace_file: PathBuf,
    usage: UsageAverages,
) -> Result<UploadOutcome, UploadError> {
    let identity = uploader.config();
    let context = UploadContext {
        profile_id: request.profile_id,
        trigger: request.source,
        session_start: request.triggered_at,
        trace_file,
        usage,
        machine_name: identity.machine_name.clone(),
        data_cube: identity.data_cube.clone(),
        file_format: TRACE_EXTENSION.to_string(),
    };
    uploader.upload(context).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::SystemTimeSource;
    use crate::alerting::{
        AlertConfiguration, AlertMetricType, AlertingConfiguration, TriggerEngine, TriggerEngineConfig,
    };
    use crate::service::{ArtifactAcceptedResponse, ArtifactService, BlobAccessPass};
    use crate::upload::{
        index::keys, IndexPublisher, RetryPolicy, ServiceProfilerIndex, UploadConfig,
    };
    use std::collections::BTreeMap;
    use uuid::Uuid;

    struct FileCapture {
        dir: tempfile::TempDir,
        fail: bool,
    }

    #[async_trait]
    impl CaptureSubsystem for FileCapture {
        async fn capture(&self, request: &TriggerRequest) -> Result<PathBuf> {
            anyhow::ensure!(!self.fail, "recorder not attached");
            let path = self.dir.path().join(format!("{}.jfr", request.profile_id));
            tokio::fs::write(&path, b"FLR\0").await?;
            Ok(path)
        }
    }

    struct AcceptingService;

    #[async_trait]
    impl ArtifactService for AcceptingService {
        async fn get_upload_access(&self, _id: Uuid, _ext: &str) -> Result<BlobAccessPass> {
            Ok(BlobAccessPass::from_location("https://store.blob.core.windows.net/c/t.jfr?sig=s"))
        }

        async fn upload_blob(
            &self,
            _pass: &BlobAccessPass,
            _body: Vec<u8>,
            _metadata: &BTreeMap<String, String>,
        ) -> Result<String> {
            Ok("etag-1".to_string())
        }

        async fn report_upload_finish(
            &self,
            _id: Uuid,
            _ext: &str,
            _etag: &str,
        ) -> Result<ArtifactAcceptedResponse> {
            Ok(ArtifactAcceptedResponse {
                accepted_time: "2021-01-25T15:51:11.0900613Z".to_string(),
                stamp_id: "stamp-1".to_string(),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<ServiceProfilerIndex>>,
    }

    #[async_trait]
    impl IndexPublisher for RecordingPublisher {
        async fn publish(&self, index: &ServiceProfilerIndex) -> Result<()> {
            self.published.lock().unwrap().push(index.clone());
            Ok(())
        }
    }

    fn uploader(publisher: Arc<RecordingPublisher>) -> Arc<UploadCoordinator> {
        let config = UploadConfig {
            machine_name: "build-host-01".to_string(),
            data_cube: "cube".to_string(),
            ..UploadConfig::default()
        };
        Arc::new(UploadCoordinator::new(
            Arc::new(AcceptingService),
            publisher,
            config,
            RetryPolicy::default(),
        ))
    }

    fn cpu_alerting() -> Arc<AlertingConfiguration> {
        Arc::new(AlertingConfiguration {
            cpu_alert: AlertConfiguration::builder(AlertMetricType::Cpu)
                .enabled(true)
                .threshold(50.0)
                .profile_duration(Duration::from_secs(1))
                .cooldown(Duration::from_secs(60))
                .build(),
            ..AlertingConfiguration::disabled()
        })
    }

    #[tokio::test]
    async fn test_trigger_captures_and_uploads() {
        let publisher = Arc::new(RecordingPublisher::default());
        let capture = Arc::new(FileCapture {
            dir: tempfile::tempdir().unwrap(),
            fail: false,
        });
        let service = Arc::new(ProfilerService::new(
            capture.clone(),
            uploader(publisher.clone()),
            Handle::current(),
        ));
        let engine = TriggerEngine::new(
            TriggerEngineConfig::default(),
            service.clone(),
            Arc::new(SystemTimeSource),
        );
        engine.update_configuration(cpu_alerting());

        engine.track(AlertMetricType::Memory, 30.0).unwrap();
        let decision = engine.track(AlertMetricType::Cpu, 75.0).unwrap();
        assert!(decision.is_triggered());

        service.drain().await;

        assert!(!engine.is_session_active());
        assert_eq!(service.in_flight(), 0);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].property(keys::SOURCE), Some("JFR-CPU"));
        assert_eq!(published[0].metric(keys::AVERAGE_CPU_USAGE), Some(75.0));
        assert_eq!(published[0].metric(keys::AVERAGE_MEMORY_USAGE), Some(30.0));
        // The trace is removed after upload
        assert_eq!(std::fs::read_dir(capture.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_capture_releases_session() {
        let publisher = Arc::new(RecordingPublisher::default());
        let health = HealthRegistry::new();
        let capture = Arc::new(FileCapture {
            dir: tempfile::tempdir().unwrap(),
            fail: true,
        });
        let service = Arc::new(
            ProfilerService::new(capture, uploader(publisher.clone()), Handle::current())
                .with_health(health.clone()),
        );
        let engine = TriggerEngine::new(
            TriggerEngineConfig::default(),
            service.clone(),
            Arc::new(SystemTimeSource),
        );
        engine.update_configuration(cpu_alerting());

        assert!(engine.track(AlertMetricType::Cpu, 99.0).unwrap().is_triggered());
        service.drain().await;

        assert!(!engine.is_session_active());
        assert!(publisher.published.lock().unwrap().is_empty());
        let report = health.health().await;
        assert!(report.components[components::TRIGGER_ENGINE]
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("recorder not attached"));
    }
}
