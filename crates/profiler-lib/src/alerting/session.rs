//! Profiling session bookkeeping shared by every trigger track

use super::AlertMetricType;
use crate::aggregation::{to_time_delta, AverageBucket, TimeSource, WindowedAggregation};
use crate::observability::AgentMetrics;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// A decision to capture a profile
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRequest {
    pub source: AlertMetricType,
    pub profile_id: Uuid,
    pub duration: Duration,
    pub triggered_at: DateTime<Utc>,
    /// Window average that crossed the threshold, absent for manual triggers
    pub window_average: Option<f64>,
    pub threshold: Option<f32>,
}

impl TriggerRequest {
    /// Trigger name recorded in the artifact index, e.g. `JFR-CPU`
    pub fn trigger_name(&self) -> String {
        format!("JFR-{}", self.source)
    }
}

/// Average CPU and memory usage over the current windows
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageAverages {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
}

/// Per-metric aggregation and cooldown
pub(crate) struct MetricTrack {
    pub(crate) window: WindowedAggregation<f64, AverageBucket>,
    cooldown_until: Mutex<Option<DateTime<Utc>>>,
}

impl MetricTrack {
    pub(crate) fn new(window: Duration, track_current_bucket: bool, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            window: WindowedAggregation::new(window, track_current_bucket, clock),
            cooldown_until: Mutex::new(None),
        }
    }

    pub(crate) fn window_average(&self) -> Option<f64> {
        AverageBucket::combined_mean(&self.window.get_data())
    }

    /// End of the cooldown if it is still running at `now`
    pub(crate) fn cooling_down_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = *self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        until.filter(|until| now < *until)
    }

    fn start_cooldown(&self, until: DateTime<Utc>) {
        *self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner()) = Some(until);
    }
}

/// State shared between the engine and outstanding sessions
pub(crate) struct EngineShared {
    pub(crate) cpu: MetricTrack,
    pub(crate) memory: MetricTrack,
    session_active: AtomicBool,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) metrics: AgentMetrics,
}

impl EngineShared {
    pub(crate) fn new(cpu: MetricTrack, memory: MetricTrack, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            cpu,
            memory,
            session_active: AtomicBool::new(false),
            clock,
            metrics: AgentMetrics::new(),
        }
    }

    pub(crate) fn track(&self, metric: AlertMetricType) -> Option<&MetricTrack> {
        match metric {
            AlertMetricType::Cpu => Some(&self.cpu),
            AlertMetricType::Memory => Some(&self.memory),
            AlertMetricType::Manual => None,
        }
    }

    pub(crate) fn is_session_active(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    pub(crate) fn usage_averages(&self) -> UsageAverages {
        UsageAverages {
            cpu: self.cpu.window_average(),
            memory: self.memory.window_average(),
        }
    }
}

/// Claim the process-wide session slot; `None` if another session holds it
pub(crate) fn try_begin_session(
    shared: &Arc<EngineShared>,
    source: AlertMetricType,
    cooldown: Duration,
) -> Option<ActiveSession> {
    shared
        .session_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .ok()?;

    shared.metrics.set_session_active(true);

    Some(ActiveSession {
        shared: shared.clone(),
        source,
        cooldown,
        started_at: shared.clock.now(),
    })
}

/// Guard for the single active profiling session
///
/// Dropping the guard ends the session: the triggering metric enters its
/// cooldown and the session slot is released.
pub struct ActiveSession {
    shared: Arc<EngineShared>,
    source: AlertMetricType,
    cooldown: Duration,
    started_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn source(&self) -> AlertMetricType {
        self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current window averages, used to annotate the uploaded artifact
    pub fn usage_averages(&self) -> UsageAverages {
        self.shared.usage_averages()
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("source", &self.source)
            .field("cooldown", &self.cooldown)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if let Some(track) = self.shared.track(self.source) {
            let until = self.shared.clock.now() + to_time_delta(self.cooldown);
            track.start_cooldown(until);
        }

        self.shared.session_active.store(false, Ordering::SeqCst);
        self.shared.metrics.set_session_active(false);
    }
}
