//! Periodic sampling loop
//!
//! Polls a `SampleSource` on a jittered interval and feeds each sample to
//! the trigger engine. A failing read or a rejected sample only affects the
//! current tick.

use super::SampleSource;
use crate::alerting::{TriggerDecision, TriggerEngine};
use crate::health::{components, HealthRegistry};
use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Base sampling interval (default: 1 second)
    pub interval: Duration,
    /// Maximum jitter added to each interval (default: 100 milliseconds)
    pub jitter: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            jitter: Duration::from_millis(100),
        }
    }
}

/// Counts from one sampling tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleCycle {
    pub accepted: usize,
    pub rejected: usize,
    pub triggered: usize,
}

pub struct SamplingLoop {
    source: Arc<dyn SampleSource>,
    engine: Arc<TriggerEngine>,
    config: SamplingConfig,
    health: Option<HealthRegistry>,
    /// Whether the last read failed
    failing: bool,
}

impl SamplingLoop {
    pub fn new(source: Arc<dyn SampleSource>, engine: Arc<TriggerEngine>, config: SamplingConfig) -> Self {
        Self {
            source,
            engine,
            config,
            health: None,
            failing: false,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Sample until shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting sampling loop"
        );

        if let Some(health) = &self.health {
            health.register(components::SAMPLER).await;
        }

        loop {
            tokio::select! {
                _ = sleep(self.next_delay()) => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling loop");
                    break;
                }
            }
        }
    }

    /// Read the source once and deliver its samples
    pub async fn sample_once(&self) -> Result<SampleCycle> {
        let samples = self.source.sample().await?;
        let mut cycle = SampleCycle::default();

        for sample in samples {
            match self.engine.track(sample.metric, sample.value) {
                Ok(decision) => {
                    cycle.accepted += 1;
                    if let TriggerDecision::Triggered { profile_id } = decision {
                        cycle.triggered += 1;
                        debug!(metric = %sample.metric, profile_id = %profile_id, "Sample triggered profiling");
                    }
                }
                Err(e) => {
                    cycle.rejected += 1;
                    debug!(metric = %sample.metric, error = %e, "Sample rejected");
                }
            }
        }

        Ok(cycle)
    }

    async fn tick(&mut self) {
        match self.sample_once().await {
            Ok(_) => {
                if self.failing {
                    info!("Sampling recovered");
                    if let Some(health) = &self.health {
                        health.set_healthy(components::SAMPLER).await;
                    }
                }
                self.failing = false;
            }
            Err(e) => {
                if !self.failing {
                    warn!(error = %e, "Failed to read usage samples");
                } else {
                    debug!(error = %e, "Usage samples still unavailable");
                }
                self.failing = true;
                if let Some(health) = &self.health {
                    health.record_failure(components::SAMPLER, e.to_string()).await;
                }
            }
        }
    }

    fn next_delay(&self) -> Duration {
        self.config.interval + Duration::from_millis(rand_jitter(self.config.jitter.as_millis() as u64))
    }
}

/// Random jitter between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max_ms)
}

/// Builder for the sampling loop
#[derive(Default)]
pub struct SamplingLoopBuilder {
    source: Option<Arc<dyn SampleSource>>,
    engine: Option<Arc<TriggerEngine>>,
    config: SamplingConfig,
    health: Option<HealthRegistry>,
}

impl SamplingLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn engine(mut self, engine: Arc<TriggerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<SamplingLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Sample source is required"))?;
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("Trigger engine is required"))?;

        let sampling_loop = SamplingLoop::new(source, engine, self.config);
        Ok(match self.health {
            Some(health) => sampling_loop.with_health(health),
            None => sampling_loop,
        })
    }
}
