//! Periodic settings poller
//!
//! Fetches the profiler settings document, converts it into an
//! `AlertingConfiguration` and hands the snapshot to every registered
//! observer. A failed poll never replaces the last good snapshot.

use super::profiler_config::{format_timestamp, never_configured, ProfilerConfiguration};
use crate::alerting::AlertingConfiguration;
use crate::error::PollError;
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::upload::{RetryBudget, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Remote endpoint serving the raw settings document
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Fetch the raw response body; `modified_since` is the last applied `lastModified`
    async fn fetch_settings(&self, modified_since: DateTime<Utc>) -> anyhow::Result<String>;
}

/// Receives every newly published configuration snapshot
pub trait ConfigurationObserver: Send + Sync {
    fn on_configuration(&self, config: Arc<AlertingConfiguration>);
}

/// Poller scheduling
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between polls (default: 60 seconds)
    pub poll_interval: Duration,
    /// Delay before the first poll (default: none)
    pub initial_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            initial_delay: Duration::ZERO,
        }
    }
}

/// Result of one successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A different snapshot was published
    Applied,
    /// The document produced the snapshot already in effect
    Unchanged,
}

struct PollerState {
    last_modified: DateTime<Utc>,
    current: Arc<AlertingConfiguration>,
}

/// Settings poller feeding the trigger engine
pub struct ConfigPoller {
    source: Arc<dyn SettingsSource>,
    observers: Vec<Arc<dyn ConfigurationObserver>>,
    config: PollerConfig,
    retry: RetryBudget,
    state: RwLock<PollerState>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    metrics: AgentMetrics,
}

impl ConfigPoller {
    pub fn new(source: Arc<dyn SettingsSource>, config: PollerConfig, retry: RetryPolicy) -> Self {
        Self {
            source,
            observers: Vec::new(),
            config,
            retry: RetryBudget::new(retry),
            state: RwLock::new(PollerState {
                last_modified: never_configured(),
                current: Arc::new(AlertingConfiguration::disabled()),
            }),
            health: None,
            logger: None,
            metrics: AgentMetrics::new(),
        }
    }

    /// Register an observer for published snapshots
    pub fn with_observer(mut self, observer: Arc<dyn ConfigurationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Snapshot currently in effect
    pub fn current(&self) -> Arc<AlertingConfiguration> {
        self.read_state().current.clone()
    }

    /// `lastModified` of the last successfully parsed document
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.read_state().last_modified
    }

    /// Fetch and parse one settings document, without retries
    ///
    /// An empty or unparsable body is a failure, never a zero-valued document.
    pub async fn pull_settings(&self) -> Result<ProfilerConfiguration, PollError> {
        let body = self
            .source
            .fetch_settings(self.last_modified())
            .await
            .map_err(PollError::Transport)?;

        if body.trim().is_empty() {
            return Err(PollError::EmptyResponse);
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Poll once under the retry budget and publish the result
    pub async fn poll_once(&self) -> Result<PollOutcome, PollError> {
        let document = self
            .retry
            .run("pull_settings", || self.pull_settings())
            .await
            .map_err(|exhausted| PollError::RetriesExhausted {
                attempts: exhausted.attempts,
                last: Box::new(exhausted.error),
            })?;

        self.metrics.inc_config_polls();
        Ok(self.apply(&document))
    }

    /// Convert a document into a snapshot and publish it if it changed
    pub fn apply(&self, document: &ProfilerConfiguration) -> PollOutcome {
        // Both "never configured" and "disabled" mean nothing may trigger
        let next = if document.is_active() {
            document.to_alerting_config()
        } else {
            AlertingConfiguration::disabled()
        };

        let published = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.last_modified = document.last_modified;

            if *state.current == next {
                None
            } else {
                let snapshot = Arc::new(next);
                state.current = snapshot.clone();
                Some(snapshot)
            }
        };

        let Some(snapshot) = published else {
            debug!(
                last_modified = %format_timestamp(&document.last_modified),
                "Profiler configuration unchanged"
            );
            return PollOutcome::Unchanged;
        };

        if let Some(logger) = &self.logger {
            logger.log_configuration_applied(
                snapshot.cpu_alert.enabled,
                snapshot.memory_alert.enabled,
                snapshot.collection_plan.single,
                &format_timestamp(&document.last_modified),
            );
        }

        for observer in &self.observers {
            observer.on_configuration(snapshot.clone());
        }

        PollOutcome::Applied
    }

    /// Poll until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "Starting configuration poller"
        );

        if let Some(health) = &self.health {
            health.register(components::CONFIG_POLLER).await;
        }

        if !self.config.initial_delay.is_zero() {
            tokio::select! {
                _ = sleep(self.config.initial_delay) => {}
                _ = shutdown.recv() => {
                    info!("Configuration poller stopped before first poll");
                    return;
                }
            }
        }

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_and_report().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down configuration poller");
                    break;
                }
            }
        }
    }

    async fn poll_and_report(&self) {
        match self.poll_once().await {
            Ok(outcome) => {
                debug!(outcome = ?outcome, "Configuration poll complete");
                if let Some(health) = &self.health {
                    health.set_healthy(components::CONFIG_POLLER).await;
                }
            }
            Err(e) => {
                self.metrics.inc_config_poll_failures();
                warn!(error = %e, "Configuration poll failed, keeping previous configuration");
                if let Some(health) = &self.health {
                    health
                        .record_failure(components::CONFIG_POLLER, e.to_string())
                        .await;
                }
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, PollerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertMetricType;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const ENABLED_DOC: &str = r#"{
        "id": "doc-1",
        "lastModified": "2024-05-01T08:00:00Z",
        "enabled": true,
        "cpuTriggerConfiguration": "--cpu-trigger-enabled true --cpu-threshold 80 --cpu-trigger-profilingDuration 30 --cpu-trigger-cooldown 600",
        "memoryTriggerConfiguration": null
    }"#;

    /// Scripted settings source returning queued responses in order
    struct MockSettingsSource {
        responses: Mutex<VecDeque<anyhow::Result<String>>>,
        calls: AtomicUsize,
        seen_timestamps: Mutex<Vec<DateTime<Utc>>>,
    }

    impl MockSettingsSource {
        fn new(responses: Vec<anyhow::Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                seen_timestamps: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SettingsSource for MockSettingsSource {
        async fn fetch_settings(&self, modified_since: DateTime<Utc>) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_timestamps.lock().unwrap().push(modified_since);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted response")))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        published: Mutex<Vec<Arc<AlertingConfiguration>>>,
    }

    impl ConfigurationObserver for RecordingObserver {
        fn on_configuration(&self, config: Arc<AlertingConfiguration>) {
            self.published.lock().unwrap().push(config);
        }
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_instant_retries: 0,
            retry_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn poller(source: Arc<MockSettingsSource>, retry: RetryPolicy) -> (ConfigPoller, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let poller = ConfigPoller::new(source, PollerConfig::default(), retry)
            .with_observer(observer.clone());
        (poller, observer)
    }

    #[tokio::test]
    async fn test_empty_body_is_a_failure() {
        let source = Arc::new(MockSettingsSource::new(vec![Ok("  \n".to_string())]));
        let (poller, _) = poller(source, no_retry());

        let result = poller.pull_settings().await;
        assert!(matches!(result, Err(PollError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_failure() {
        let source = Arc::new(MockSettingsSource::new(vec![Ok("{\"enabled\": tru".to_string())]));
        let (poller, _) = poller(source, no_retry());

        assert!(matches!(poller.pull_settings().await, Err(PollError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_enabled_document_is_published() {
        let source = Arc::new(MockSettingsSource::new(vec![Ok(ENABLED_DOC.to_string())]));
        let (poller, observer) = poller(source, no_retry());

        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Applied);

        let current = poller.current();
        assert!(current.cpu_alert.enabled);
        assert_eq!(current.cpu_alert.metric_type, AlertMetricType::Cpu);
        assert_eq!(observer.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_configuration() {
        let source = Arc::new(MockSettingsSource::new(vec![
            Ok(ENABLED_DOC.to_string()),
            Ok(String::new()),
        ]));
        let (poller, observer) = poller(source, no_retry());

        poller.poll_once().await.unwrap();
        let before = poller.current();

        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, PollError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(poller.current(), before);
        assert_eq!(observer.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let source = Arc::new(MockSettingsSource::new(vec![
            Err(anyhow::anyhow!("connection reset")),
            Ok(ENABLED_DOC.to_string()),
        ]));
        let retry = RetryPolicy {
            max_instant_retries: 3,
            retry_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let (poller, _) = poller(source.clone(), retry);

        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Applied);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_or_unconfigured_document_publishes_disabled() {
        let disabled = ENABLED_DOC.replace("\"enabled\": true", "\"enabled\": false");
        let unconfigured =
            ENABLED_DOC.replace("2024-05-01T08:00:00Z", "0001-01-01T00:00:00+00:00");

        let source = Arc::new(MockSettingsSource::new(vec![
            Ok(ENABLED_DOC.to_string()),
            Ok(disabled),
            Ok(ENABLED_DOC.to_string()),
            Ok(unconfigured),
        ]));
        let (poller, observer) = poller(source, no_retry());

        for _ in 0..4 {
            assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Applied);
        }

        let published = observer.published.lock().unwrap();
        assert!(published[0].cpu_alert.enabled);
        assert_eq!(*published[1], AlertingConfiguration::disabled());
        assert!(published[2].cpu_alert.enabled);
        assert_eq!(*published[3], AlertingConfiguration::disabled());
    }

    #[tokio::test]
    async fn test_unchanged_document_is_not_republished() {
        let source = Arc::new(MockSettingsSource::new(vec![
            Ok(ENABLED_DOC.to_string()),
            Ok(ENABLED_DOC.to_string()),
        ]));
        let (poller, observer) = poller(source, no_retry());

        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Applied);
        assert_eq!(poller.poll_once().await.unwrap(), PollOutcome::Unchanged);
        assert_eq!(observer.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_last_modified_is_sent_on_next_poll() {
        let source = Arc::new(MockSettingsSource::new(vec![
            Ok(ENABLED_DOC.to_string()),
            Ok(ENABLED_DOC.to_string()),
        ]));
        let (poller, _) = poller(source.clone(), no_retry());

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        let seen = source.seen_timestamps.lock().unwrap();
        assert_eq!(seen[0], never_configured());
        assert_eq!(format_timestamp(&seen[1]), "2024-05-01T08:00:00+00:00");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(MockSettingsSource::new(vec![Ok(ENABLED_DOC.to_string())]));
        let health = HealthRegistry::new();
        let poller = Arc::new(
            ConfigPoller::new(
                source,
                PollerConfig {
                    poll_interval: Duration::from_secs(3600),
                    initial_delay: Duration::ZERO,
                },
                no_retry(),
            )
            .with_health(health.clone()),
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(poller.clone().run(shutdown_rx));

        // The first tick fires immediately
        for _ in 0..50 {
            if poller.current().cpu_alert.enabled {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(poller.current().cpu_alert.enabled);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        let status = health.health().await;
        assert!(status.components.contains_key(components::CONFIG_POLLER));
    }
}
