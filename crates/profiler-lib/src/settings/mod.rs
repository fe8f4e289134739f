//! Remote profiler settings
//!
//! - `ProfilerConfiguration`: the raw JSON document served by the frontend
//! - `ConfigPoller`: periodic fetch that republishes an `AlertingConfiguration`

mod poller;
mod profiler_config;

pub use poller::{ConfigPoller, ConfigurationObserver, PollOutcome, PollerConfig, SettingsSource};
pub use profiler_config::{format_timestamp, never_configured, ProfilerConfiguration};
