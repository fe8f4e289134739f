//! Host-wide usage from procfs
//!
//! - /proc/stat aggregate `cpu` line, diffed between readings
//! - /proc/meminfo `MemTotal` and `MemAvailable`

use super::{MetricSample, SampleSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

/// Cumulative CPU jiffies from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    /// idle + iowait
    pub idle: u64,
}

impl CpuTimes {
    /// Busy percentage between an earlier reading and this one
    pub fn usage_since(&self, earlier: &CpuTimes) -> Option<f64> {
        let total = self.total.checked_sub(earlier.total)?;
        let idle = self.idle.checked_sub(earlier.idle)?;
        if total == 0 {
            return None;
        }

        let busy = total.saturating_sub(idle);
        Some(busy as f64 / total as f64 * 100.0)
    }
}

/// Sample source reading procfs
pub struct ProcSampleSource {
    proc_path: PathBuf,
    previous_cpu: Mutex<Option<CpuTimes>>,
}

impl ProcSampleSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create a source with a custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            previous_cpu: Mutex::new(None),
        }
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|line| line.starts_with("cpu "))
            .context("No aggregate cpu line in /proc/stat")?;

        let values: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .context("Invalid cpu counter in /proc/stat")?;

        anyhow::ensure!(values.len() >= 4, "Truncated cpu line in /proc/stat");

        // user nice system idle iowait irq softirq steal; guest time is
        // already included in user
        let counted = &values[..values.len().min(8)];
        let idle = values[3] + values.get(4).copied().unwrap_or(0);

        Ok(CpuTimes {
            total: counted.iter().sum(),
            idle,
        })
    }

    /// Used memory percentage from /proc/meminfo
    pub fn parse_memory_usage(content: &str) -> Result<f64> {
        let mut total = None;
        let mut available = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("MemTotal:"), Some(value)) => total = value.parse::<u64>().ok(),
                (Some("MemAvailable:"), Some(value)) => available = value.parse::<u64>().ok(),
                _ => {}
            }
        }

        let total = total.filter(|t| *t > 0).context("MemTotal missing from /proc/meminfo")?;
        let available = available.context("MemAvailable missing from /proc/meminfo")?;

        Ok(total.saturating_sub(available) as f64 / total as f64 * 100.0)
    }

    async fn read(&self, file: &str) -> Result<String> {
        let path = self.proc_path.join(file);
        fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

impl Default for ProcSampleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleSource for ProcSampleSource {
    async fn sample(&self) -> Result<Vec<MetricSample>> {
        let mut samples = Vec::with_capacity(2);

        let times = Self::parse_cpu_times(&self.read("stat").await?)?;
        let previous = self
            .previous_cpu
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(times);
        // The first reading only establishes a baseline
        if let Some(usage) = previous.and_then(|p| times.usage_since(&p)) {
            samples.push(MetricSample::cpu(usage));
        }

        let memory = Self::parse_memory_usage(&self.read("meminfo").await?)?;
        samples.push(MetricSample::memory(memory));

        Ok(samples)
    }
}
