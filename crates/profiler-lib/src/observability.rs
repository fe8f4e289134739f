//! Observability infrastructure for the profiler agent
//!
//! Provides:
//! - Prometheus metrics (samples, triggers, config polls, uploads)
//! - Structured JSON logging of trigger and upload events with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for upload latency (in seconds)
const UPLOAD_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    samples_processed: IntCounterVec,
    sample_errors: IntCounter,
    window_average: GaugeVec,
    triggers_issued: IntCounterVec,
    triggers_suppressed: IntCounterVec,
    session_active: IntGauge,
    config_polls: IntCounter,
    config_poll_failures: IntCounter,
    uploads_completed: IntCounter,
    upload_failures: IntCounterVec,
    upload_latency_seconds: Histogram,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            samples_processed: register_int_counter_vec!(
                "profiler_agent_samples_processed_total",
                "Metric samples fed into the trigger engine",
                &["metric"]
            )
            .expect("Failed to register samples_processed"),

            sample_errors: register_int_counter!(
                "profiler_agent_sample_errors_total",
                "Samples dropped because they could not be read or aggregated"
            )
            .expect("Failed to register sample_errors"),

            window_average: register_gauge_vec!(
                "profiler_agent_window_average_percent",
                "Current sliding-window average per metric",
                &["metric"]
            )
            .expect("Failed to register window_average"),

            triggers_issued: register_int_counter_vec!(
                "profiler_agent_triggers_issued_total",
                "Profiling sessions started, by trigger source",
                &["source"]
            )
            .expect("Failed to register triggers_issued"),

            triggers_suppressed: register_int_counter_vec!(
                "profiler_agent_triggers_suppressed_total",
                "Threshold breaches that did not start a session",
                &["reason"]
            )
            .expect("Failed to register triggers_suppressed"),

            session_active: register_int_gauge!(
                "profiler_agent_session_active",
                "1 while a profiling session is running"
            )
            .expect("Failed to register session_active"),

            config_polls: register_int_counter!(
                "profiler_agent_config_polls_total",
                "Settings documents fetched successfully"
            )
            .expect("Failed to register config_polls"),

            config_poll_failures: register_int_counter!(
                "profiler_agent_config_poll_failures_total",
                "Settings polls that failed after retries"
            )
            .expect("Failed to register config_poll_failures"),

            uploads_completed: register_int_counter!(
                "profiler_agent_uploads_completed_total",
                "Trace artifacts uploaded, committed and indexed"
            )
            .expect("Failed to register uploads_completed"),

            upload_failures: register_int_counter_vec!(
                "profiler_agent_upload_failures_total",
                "Trace uploads abandoned, by failing stage",
                &["stage"]
            )
            .expect("Failed to register upload_failures"),

            upload_latency_seconds: register_histogram!(
                "profiler_agent_upload_latency_seconds",
                "Wall time of the full upload protocol",
                UPLOAD_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register upload_latency_seconds"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn inc_samples_processed(&self, metric: &str) {
        self.inner()
            .samples_processed
            .with_label_values(&[metric])
            .inc();
    }

    pub fn inc_sample_errors(&self) {
        self.inner().sample_errors.inc();
    }

    pub fn set_window_average(&self, metric: &str, value: f64) {
        self.inner()
            .window_average
            .with_label_values(&[metric])
            .set(value);
    }

    pub fn inc_triggers_issued(&self, source: &str) {
        self.inner().triggers_issued.with_label_values(&[source]).inc();
    }

    pub fn inc_triggers_suppressed(&self, reason: &str) {
        self.inner()
            .triggers_suppressed
            .with_label_values(&[reason])
            .inc();
    }

    pub fn set_session_active(&self, active: bool) {
        self.inner().session_active.set(i64::from(active));
    }

    pub fn inc_config_polls(&self) {
        self.inner().config_polls.inc();
    }

    pub fn inc_config_poll_failures(&self) {
        self.inner().config_poll_failures.inc();
    }

    pub fn inc_uploads_completed(&self) {
        self.inner().uploads_completed.inc();
    }

    pub fn inc_upload_failures(&self, stage: &str) {
        self.inner().upload_failures.with_label_values(&[stage]).inc();
    }

    pub fn observe_upload_latency(&self, elapsed: Duration) {
        self.inner()
            .upload_latency_seconds
            .observe(elapsed.as_secs_f64());
    }
}

/// Structured logger for agent events
///
/// Consistent JSON-formatted events for triggers, configuration changes and
/// uploads, tagged with the machine name.
#[derive(Clone)]
pub struct StructuredLogger {
    machine_name: String,
}

impl StructuredLogger {
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
        }
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Log a profiling session start
    pub fn log_profile_triggered(
        &self,
        source: &str,
        profile_id: &str,
        duration: Duration,
        window_average: Option<f64>,
        threshold: Option<f32>,
    ) {
        info!(
            event = "profile_triggered",
            machine = %self.machine_name,
            source = %source,
            profile_id = %profile_id,
            duration_secs = duration.as_secs(),
            window_average = ?window_average,
            threshold = ?threshold,
            "Profiling session triggered"
        );
    }

    /// Log a newly applied alerting configuration
    pub fn log_configuration_applied(
        &self,
        cpu_enabled: bool,
        memory_enabled: bool,
        manual_plan: bool,
        last_modified: &str,
    ) {
        info!(
            event = "configuration_applied",
            machine = %self.machine_name,
            cpu_enabled = cpu_enabled,
            memory_enabled = memory_enabled,
            manual_plan = manual_plan,
            last_modified = %last_modified,
            "Applied profiler configuration"
        );
    }

    /// Log a completed upload
    pub fn log_upload_completed(&self, profile_id: &str, stamp_id: &str, blob_uri: &str) {
        info!(
            event = "upload_completed",
            machine = %self.machine_name,
            profile_id = %profile_id,
            stamp_id = %stamp_id,
            blob_uri = %blob_uri,
            "Trace uploaded and committed"
        );
    }

    /// Log an abandoned upload
    pub fn log_upload_failed(&self, profile_id: &str, stage: &str, error: &str) {
        warn!(
            event = "upload_failed",
            machine = %self.machine_name,
            profile_id = %profile_id,
            stage = %stage,
            error = %error,
            "Trace upload abandoned"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, endpoint: &str) {
        info!(
            event = "agent_started",
            machine = %self.machine_name,
            agent_version = %version,
            endpoint = %endpoint,
            "Profiler agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            machine = %self.machine_name,
            reason = %reason,
            "Profiler agent shutting down"
        );
    }
}
