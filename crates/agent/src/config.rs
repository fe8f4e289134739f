//! Agent configuration

use anyhow::{Context, Result};
use profiler_lib::alerting::TriggerEngineConfig;
use profiler_lib::sampling::SamplingConfig;
use profiler_lib::service::ClientConfig;
use profiler_lib::settings::PollerConfig;
use profiler_lib::upload::{RetryPolicy, UploadConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration, read from `PROFILER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Machine name attached to artifacts and log events
    #[serde(default = "default_machine_name")]
    pub machine_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Profiler frontend endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub instrumentation_key: String,

    /// Application id the profiles belong to
    #[serde(default)]
    pub app_id: String,

    #[serde(default)]
    pub role_name: Option<String>,

    /// Process being profiled; defaults to this agent's own pid
    #[serde(default)]
    pub target_pid: Option<u32>,

    /// Settings poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Sampling interval in milliseconds
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_ms: u64,

    #[serde(default = "default_window")]
    pub cpu_window_secs: u64,

    #[serde(default = "default_window")]
    pub memory_window_secs: u64,

    /// Capture command; `{pid}`, `{duration}` and `{output}` are substituted
    #[serde(default = "default_capture_command")]
    pub capture_command: String,

    /// Directory traces are written to
    #[serde(default = "default_trace_dir")]
    pub trace_dir: PathBuf,

    #[serde(default)]
    pub retain_trace_files: bool,

    #[serde(default = "default_max_instant_retries")]
    pub max_instant_retries: u32,

    #[serde(default = "default_retry_reset_mins")]
    pub retry_reset_mins: u64,
}

fn default_machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_endpoint() -> String {
    "https://agent.azureserviceprofiler.net".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_sampling_interval() -> u64 {
    1000
}

fn default_window() -> u64 {
    120
}

fn default_capture_command() -> String {
    "jcmd {pid} JFR.start duration={duration}s filename={output}".to_string()
}

fn default_trace_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_max_instant_retries() -> u32 {
    profiler_lib::upload::DEFAULT_MAX_INSTANT_RETRIES
}

fn default_retry_reset_mins() -> u64 {
    profiler_lib::upload::DEFAULT_RESET_PERIOD.as_secs() / 60
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PROFILER"))
            .build()?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid PROFILER_* configuration")?;
        config.validate()?;

        Ok(config)
    }

    /// Reject settings that would produce artifacts the backend cannot index
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.app_id.trim().is_empty(), "PROFILER_APP_ID is required");
        anyhow::ensure!(
            !self.machine_name.trim().is_empty(),
            "PROFILER_MACHINE_NAME must not be empty"
        );
        anyhow::ensure!(
            !self.instrumentation_key.trim().is_empty(),
            "PROFILER_INSTRUMENTATION_KEY is required"
        );
        Ok(())
    }

    pub fn target_pid(&self) -> u32 {
        self.target_pid.unwrap_or_else(std::process::id)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.endpoint.as_str(), self.instrumentation_key.as_str())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_instant_retries: self.max_instant_retries,
            reset_period: Duration::from_secs(self.retry_reset_mins * 60),
            ..RetryPolicy::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..PollerConfig::default()
        }
    }

    pub fn sampling_config(&self) -> SamplingConfig {
        SamplingConfig {
            interval: Duration::from_millis(self.sampling_interval_ms),
            ..SamplingConfig::default()
        }
    }

    pub fn engine_config(&self) -> TriggerEngineConfig {
        TriggerEngineConfig {
            cpu_window: Duration::from_secs(self.cpu_window_secs),
            memory_window: Duration::from_secs(self.memory_window_secs),
            ..TriggerEngineConfig::default()
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            machine_name: self.machine_name.clone(),
            process_id: self.target_pid().to_string(),
            role_name: self.role_name.clone(),
            data_cube: self.app_id.clone(),
            retain_trace_files: self.retain_trace_files,
        }
    }
}
