//! Alerting: configuration snapshots, the flag-string parser and the
//! trigger engine that decides when a profile is captured.

mod config;
mod engine;
mod parser;
mod session;

pub use config::{
    AlertConfiguration, AlertConfigurationBuilder, AlertMetricType, AlertingConfiguration,
    CollectionPlanConfiguration, DefaultConfiguration, DefaultConfigurationBuilder, EngineMode,
};
pub use engine::{TriggerDecision, TriggerEngine, TriggerEngineConfig, TriggerHandler};
pub use parser::{decode_binary_date, ConfigStringParser};
pub use session::{ActiveSession, TriggerRequest, UsageAverages};
