//! Alerting configuration values
//!
//! These are the parsed, validated snapshots the trigger engine consumes.
//! A snapshot is never mutated after construction; the poller replaces it
//! wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What caused, or may cause, a profiling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertMetricType {
    Cpu,
    Memory,
    Manual,
}

impl AlertMetricType {
    /// Metrics that are fed by samples and evaluated against thresholds
    pub const SAMPLED: [AlertMetricType; 2] = [AlertMetricType::Cpu, AlertMetricType::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertMetricType::Cpu => "CPU",
            AlertMetricType::Memory => "MEMORY",
            AlertMetricType::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for AlertMetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Threshold trigger settings for one metric
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfiguration {
    pub metric_type: AlertMetricType,
    pub enabled: bool,
    /// Percentage the window average must exceed
    pub threshold: f32,
    pub profile_duration: Duration,
    pub cooldown: Duration,
}

impl AlertConfiguration {
    /// A configuration that never triggers
    pub fn disabled(metric_type: AlertMetricType) -> Self {
        AlertConfigurationBuilder::new(metric_type).build()
    }

    pub fn builder(metric_type: AlertMetricType) -> AlertConfigurationBuilder {
        AlertConfigurationBuilder::new(metric_type)
    }
}

/// Builder for [`AlertConfiguration`]
#[derive(Debug, Clone)]
pub struct AlertConfigurationBuilder {
    config: AlertConfiguration,
}

impl AlertConfigurationBuilder {
    pub fn new(metric_type: AlertMetricType) -> Self {
        Self {
            config: AlertConfiguration {
                metric_type,
                enabled: false,
                threshold: 0.0,
                profile_duration: Duration::ZERO,
                cooldown: Duration::ZERO,
            },
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn profile_duration(mut self, duration: Duration) -> Self {
        self.config.profile_duration = duration;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn build(self) -> AlertConfiguration {
        self.config
    }
}

/// Periodic sampling profile settings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefaultConfiguration {
    pub sampling_enabled: bool,
    pub sampling_rate: f64,
    pub sampling_profile_duration: Duration,
}

impl DefaultConfiguration {
    pub fn builder() -> DefaultConfigurationBuilder {
        DefaultConfigurationBuilder::default()
    }
}

/// Builder for [`DefaultConfiguration`]
#[derive(Debug, Clone, Default)]
pub struct DefaultConfigurationBuilder {
    config: DefaultConfiguration,
}

impl DefaultConfigurationBuilder {
    pub fn sampling_enabled(mut self, enabled: bool) -> Self {
        self.config.sampling_enabled = enabled;
        self
    }

    pub fn sampling_rate(mut self, rate: f64) -> Self {
        self.config.sampling_rate = rate;
        self
    }

    pub fn sampling_profile_duration(mut self, duration: Duration) -> Self {
        self.config.sampling_profile_duration = duration;
        self
    }

    pub fn build(self) -> DefaultConfiguration {
        self.config
    }
}

/// How a collection plan is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMode {
    Immediate,
    Other(String),
}

impl EngineMode {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("immediate") {
            EngineMode::Immediate
        } else {
            EngineMode::Other(value.to_string())
        }
    }
}

/// One-shot, operator-issued profiling request
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPlanConfiguration {
    pub single: bool,
    pub mode: EngineMode,
    pub expiration: DateTime<Utc>,
    pub immediate_profiling_duration: Duration,
    /// Opaque identifier of the request; a plan fires at most once per moniker
    pub settings_moniker: String,
}

impl CollectionPlanConfiguration {
    /// An inactive plan, expired at the Unix epoch
    pub fn disabled() -> Self {
        Self {
            single: false,
            mode: EngineMode::Immediate,
            expiration: DateTime::<Utc>::default(),
            immediate_profiling_duration: Duration::ZERO,
            settings_moniker: String::new(),
        }
    }

    /// Whether the plan asks for an immediate capture that has not yet expired
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.single && self.mode == EngineMode::Immediate && now < self.expiration
    }
}

impl Default for CollectionPlanConfiguration {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Complete configuration snapshot for the trigger engine
#[derive(Debug, Clone, PartialEq)]
pub struct AlertingConfiguration {
    pub cpu_alert: AlertConfiguration,
    pub memory_alert: AlertConfiguration,
    pub default_configuration: DefaultConfiguration,
    pub collection_plan: CollectionPlanConfiguration,
}

impl AlertingConfiguration {
    /// Safe defaults: nothing is enabled
    pub fn disabled() -> Self {
        Self {
            cpu_alert: AlertConfiguration::disabled(AlertMetricType::Cpu),
            memory_alert: AlertConfiguration::disabled(AlertMetricType::Memory),
            default_configuration: DefaultConfiguration::default(),
            collection_plan: CollectionPlanConfiguration::disabled(),
        }
    }

    /// Alert settings for a sampled metric, `None` for the manual track
    pub fn alert_for(&self, metric_type: AlertMetricType) -> Option<&AlertConfiguration> {
        match metric_type {
            AlertMetricType::Cpu => Some(&self.cpu_alert),
            AlertMetricType::Memory => Some(&self.memory_alert),
            AlertMetricType::Manual => None,
        }
    }

    /// Whether any alert or an immediate single plan is switched on
    pub fn has_an_enabled_trigger(&self) -> bool {
        self.cpu_alert.enabled
            || self.memory_alert.enabled
            || (self.collection_plan.single && self.collection_plan.mode == EngineMode::Immediate)
    }
}

impl Default for AlertingConfiguration {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_configuration() {
        let config = AlertingConfiguration::disabled();

        assert!(!config.cpu_alert.enabled);
        assert!(!config.memory_alert.enabled);
        assert!(!config.default_configuration.sampling_enabled);
        assert!(!config.collection_plan.single);
        assert_eq!(config.collection_plan.expiration, DateTime::<Utc>::default());
        assert!(!config.has_an_enabled_trigger());
    }

    #[test]
    fn test_alert_for_routes_by_metric() {
        let config = AlertingConfiguration {
            cpu_alert: AlertConfiguration::builder(AlertMetricType::Cpu)
                .enabled(true)
                .threshold(75.0)
                .build(),
            ..AlertingConfiguration::disabled()
        };

        assert_eq!(config.alert_for(AlertMetricType::Cpu).map(|a| a.threshold), Some(75.0));
        assert_eq!(
            config.alert_for(AlertMetricType::Memory).map(|a| a.metric_type),
            Some(AlertMetricType::Memory)
        );
        assert!(config.alert_for(AlertMetricType::Manual).is_none());
        assert!(config.has_an_enabled_trigger());
    }

    #[test]
    fn test_collection_plan_activity() {
        let now = Utc::now();
        let mut plan = CollectionPlanConfiguration {
            single: true,
            mode: EngineMode::Immediate,
            expiration: now + chrono::Duration::minutes(5),
            immediate_profiling_duration: Duration::from_secs(120),
            settings_moniker: "moniker".to_string(),
        };
        assert!(plan.is_active_at(now));
        assert!(!plan.is_active_at(plan.expiration));

        plan.mode = EngineMode::parse("scheduled");
        assert!(!plan.is_active_at(now));
        assert_eq!(EngineMode::parse("Immediate"), EngineMode::Immediate);
    }

    #[test]
    fn test_metric_type_display() {
        assert_eq!(AlertMetricType::Cpu.to_string(), "CPU");
        assert_eq!(AlertMetricType::Manual.as_str(), "MANUAL");
    }
}
