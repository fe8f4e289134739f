//! Threshold, cooldown and collection-plan trigger state machine
//!
//! CPU and memory samples are smoothed through one rolling window per metric.
//! A metric triggers when its window average exceeds the configured
//! threshold, it is not cooling down, and no other profiling session is
//! active. The manual collection plan bypasses thresholds but competes for
//! the same session slot.

use super::session::{try_begin_session, ActiveSession, EngineShared, MetricTrack, TriggerRequest};
use super::{AlertMetricType, AlertingConfiguration};
use crate::aggregation::TimeSource;
use crate::error::SampleError;
use crate::observability::StructuredLogger;
use crate::settings::ConfigurationObserver;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Receives trigger decisions
///
/// The session guard must be held for as long as the capture runs. It is
/// called on the thread that delivered the sample, so implementations should
/// hand long-running work off to another task.
pub trait TriggerHandler: Send + Sync {
    fn on_trigger(&self, request: TriggerRequest, session: ActiveSession);
}

/// Window lengths of the per-metric aggregations
#[derive(Debug, Clone)]
pub struct TriggerEngineConfig {
    pub cpu_window: Duration,
    pub memory_window: Duration,
    /// Include the still-filling bucket in window averages
    pub track_current_bucket: bool,
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            cpu_window: Duration::from_secs(120),
            memory_window: Duration::from_secs(120),
            track_current_bucket: true,
        }
    }
}

/// Outcome of evaluating one track
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    /// The track is switched off, or the collection plan is not active
    Disabled,
    /// The window holds no samples yet
    NoData,
    BelowThreshold { average: f64 },
    CoolingDown { until: DateTime<Utc> },
    /// The collection plan's moniker has already produced a session
    AlreadyExecuted,
    /// Another session holds the process-wide slot
    SessionActive,
    Triggered { profile_id: Uuid },
}

impl TriggerDecision {
    pub fn is_triggered(&self) -> bool {
        matches!(self, TriggerDecision::Triggered { .. })
    }
}

pub struct TriggerEngine {
    shared: Arc<EngineShared>,
    config: RwLock<Arc<AlertingConfiguration>>,
    manual_triggers_executed: Mutex<HashSet<String>>,
    handler: Arc<dyn TriggerHandler>,
    logger: Option<StructuredLogger>,
}

impl TriggerEngine {
    pub fn new(
        config: TriggerEngineConfig,
        handler: Arc<dyn TriggerHandler>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let cpu = MetricTrack::new(config.cpu_window, config.track_current_bucket, clock.clone());
        let memory = MetricTrack::new(config.memory_window, config.track_current_bucket, clock.clone());

        Self {
            shared: Arc::new(EngineShared::new(cpu, memory, clock)),
            config: RwLock::new(Arc::new(AlertingConfiguration::disabled())),
            manual_triggers_executed: Mutex::new(HashSet::new()),
            handler,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Configuration snapshot currently in effect
    pub fn configuration(&self) -> Arc<AlertingConfiguration> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_session_active(&self) -> bool {
        self.shared.is_session_active()
    }

    /// Average of a sampled metric's current window
    pub fn window_average(&self, metric: AlertMetricType) -> Option<f64> {
        self.shared.track(metric).and_then(MetricTrack::window_average)
    }

    /// Swap in a new configuration and evaluate its collection plan
    pub fn update_configuration(&self, config: Arc<AlertingConfiguration>) -> TriggerDecision {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        self.evaluate_collection_plan()
    }

    /// Feed one sample and evaluate that metric's threshold
    ///
    /// A pending collection plan is evaluated first, so a plan skipped while
    /// a session was running fires on the first sample after it ends.
    pub fn track(&self, metric: AlertMetricType, value: f64) -> Result<TriggerDecision, SampleError> {
        let track = match self.shared.track(metric) {
            Some(track) => track,
            None => return Err(self.reject(SampleError::Untracked(metric))),
        };
        if !value.is_finite() {
            return Err(self.reject(SampleError::NonFinite(value)));
        }
        if value < 0.0 {
            return Err(self.reject(SampleError::Negative(value)));
        }

        track.window.update(value);
        self.shared.metrics.inc_samples_processed(metric.as_str());

        self.evaluate_collection_plan();

        let config = self.configuration();
        let alert = match config.alert_for(metric) {
            Some(alert) if alert.enabled => alert,
            _ => return Ok(TriggerDecision::Disabled),
        };

        let average = match track.window_average() {
            Some(average) => average,
            None => return Ok(TriggerDecision::NoData),
        };
        self.shared.metrics.set_window_average(metric.as_str(), average);

        if !(average > f64::from(alert.threshold)) {
            return Ok(TriggerDecision::BelowThreshold { average });
        }

        let now = self.shared.clock.now();
        if let Some(until) = track.cooling_down_until(now) {
            self.shared.metrics.inc_triggers_suppressed("cooldown");
            debug!(metric = %metric, average, until = %until, "Threshold exceeded during cooldown");
            return Ok(TriggerDecision::CoolingDown { until });
        }

        let session = match try_begin_session(&self.shared, metric, alert.cooldown) {
            Some(session) => session,
            None => {
                self.shared.metrics.inc_triggers_suppressed("session_active");
                return Ok(TriggerDecision::SessionActive);
            }
        };

        let request = TriggerRequest {
            source: metric,
            profile_id: Uuid::new_v4(),
            duration: alert.profile_duration,
            triggered_at: now,
            window_average: Some(average),
            threshold: Some(alert.threshold),
        };
        Ok(self.fire(request, session))
    }

    /// Start a session for the collection plan if it is active and unexecuted
    pub fn evaluate_collection_plan(&self) -> TriggerDecision {
        let config = self.configuration();
        let plan = &config.collection_plan;
        let now = self.shared.clock.now();

        if !plan.is_active_at(now) {
            return TriggerDecision::Disabled;
        }

        let session = {
            let mut executed = self
                .manual_triggers_executed
                .lock()
                .unwrap_or_else(|e| e.into_inner());

            if executed.contains(&plan.settings_moniker) {
                return TriggerDecision::AlreadyExecuted;
            }

            match try_begin_session(&self.shared, AlertMetricType::Manual, Duration::ZERO) {
                Some(session) => {
                    executed.insert(plan.settings_moniker.clone());
                    session
                }
                None => {
                    debug!(moniker = %plan.settings_moniker, "Collection plan deferred, session active");
                    self.shared.metrics.inc_triggers_suppressed("session_active");
                    return TriggerDecision::SessionActive;
                }
            }
        };

        let request = TriggerRequest {
            source: AlertMetricType::Manual,
            profile_id: Uuid::new_v4(),
            duration: plan.immediate_profiling_duration,
            triggered_at: now,
            window_average: None,
            threshold: None,
        };
        self.fire(request, session)
    }

    fn fire(&self, request: TriggerRequest, session: ActiveSession) -> TriggerDecision {
        let profile_id = request.profile_id;
        self.shared.metrics.inc_triggers_issued(request.source.as_str());

        match &self.logger {
            Some(logger) => logger.log_profile_triggered(
                request.source.as_str(),
                &profile_id.to_string(),
                request.duration,
                request.window_average,
                request.threshold,
            ),
            None => info!(
                source = %request.source,
                profile_id = %profile_id,
                duration_secs = request.duration.as_secs(),
                "Profiling session triggered"
            ),
        }

        self.handler.on_trigger(request, session);
        TriggerDecision::Triggered { profile_id }
    }

    fn reject(&self, error: SampleError) -> SampleError {
        self.shared.metrics.inc_sample_errors();
        debug!(error = %error, "Sample rejected");
        error
    }
}

impl ConfigurationObserver for TriggerEngine {
    fn on_configuration(&self, config: Arc<AlertingConfiguration>) {
        self.update_configuration(config);
    }
}
