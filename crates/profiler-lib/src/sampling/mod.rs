//! System usage sampling
//!
//! A `SampleSource` produces CPU and memory usage percentages; the
//! `SamplingLoop` polls it on a fixed cadence and feeds every sample to the
//! trigger engine.

mod r#loop;
mod proc;

pub use proc::{CpuTimes, ProcSampleSource};
pub use r#loop::{SamplingConfig, SamplingLoop, SamplingLoopBuilder};

use crate::alerting::AlertMetricType;
use anyhow::Result;
use async_trait::async_trait;

/// One usage reading, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub metric: AlertMetricType,
    pub value: f64,
}

impl MetricSample {
    pub fn cpu(value: f64) -> Self {
        Self {
            metric: AlertMetricType::Cpu,
            value,
        }
    }

    pub fn memory(value: f64) -> Self {
        Self {
            metric: AlertMetricType::Memory,
            value,
        }
    }
}

/// Source of usage samples
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Read the current usage; may return fewer samples than metrics
    async fn sample(&self) -> Result<Vec<MetricSample>>;
}
