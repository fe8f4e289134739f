//! Trigger engine for a continuous Java profiler
//!
//! This crate decides when a profile is captured and delivers it:
//! - Rolling-window aggregation of CPU and memory samples
//! - Flag-string configuration parsing and periodic settings polling
//! - Threshold, cooldown and collection-plan triggering
//! - Trace upload with bounded retries and index publication
//! - Health checks and observability

pub mod aggregation;
pub mod alerting;
pub mod error;
pub mod health;
pub mod observability;
pub mod profiler;
pub mod sampling;
pub mod service;
pub mod settings;
pub mod upload;

pub use alerting::{
    AlertConfiguration, AlertMetricType, AlertingConfiguration, ConfigStringParser, TriggerEngine,
};
pub use error::{PollError, SampleError, UploadError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{AgentMetrics, StructuredLogger};
pub use settings::{ConfigPoller, ProfilerConfiguration};
pub use upload::UploadCoordinator;
