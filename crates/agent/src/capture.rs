//! External capture command

use anyhow::{Context, Result};
use async_trait::async_trait;
use profiler_lib::alerting::TriggerRequest;
use profiler_lib::profiler::CaptureSubsystem;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

/// How long a trace may take to appear once the recording should have ended;
/// stays inside the grace period the profiler service allows a capture
const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(45);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs a configured command to record a trace
///
/// The command may return before the recording ends (e.g. `jcmd JFR.start`).
/// Once the requested duration has elapsed the output file is polled until it
/// exists and its size stops changing.
pub struct CommandCapture {
    template: String,
    pid: u32,
    output_dir: PathBuf,
    settle_timeout: Duration,
    poll_interval: Duration,
}

impl CommandCapture {
    pub fn new(template: impl Into<String>, pid: u32, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            pid,
            output_dir: output_dir.into(),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Substitute placeholders and split into program and arguments
    fn command_line(&self, duration_secs: u64, output: &Path) -> Vec<String> {
        self.template
            .split_whitespace()
            .map(|part| {
                part.replace("{pid}", &self.pid.to_string())
                    .replace("{duration}", &duration_secs.to_string())
                    .replace("{output}", &output.display().to_string())
            })
            .collect()
    }

    /// Wait for the recorder to finish writing `output`
    async fn wait_for_trace(&self, output: &Path, deadline: Instant) -> Result<()> {
        let mut last_len = None;

        loop {
            match tokio::fs::metadata(output).await {
                Ok(metadata) => {
                    let len = metadata.len();
                    if last_len == Some(len) {
                        return Ok(());
                    }
                    last_len = Some(len);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => last_len = None,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to inspect trace at {}", output.display()))
                }
            }

            if Instant::now() >= deadline {
                match last_len {
                    Some(len) => anyhow::bail!(
                        "Trace at {} still being written ({} bytes)",
                        output.display(),
                        len
                    ),
                    None => anyhow::bail!("Capture produced no trace at {}", output.display()),
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl CaptureSubsystem for CommandCapture {
    async fn capture(&self, request: &TriggerRequest) -> Result<PathBuf> {
        let output = self.output_dir.join(format!("{}.jfr", request.profile_id));

        let args = self.command_line(request.duration.as_secs(), &output);
        let (program, args) = args.split_first().context("Capture command is empty")?;

        debug!(program = %program, output = %output.display(), "Starting capture");
        let started = Instant::now();
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to run capture command {}", program))?;
        anyhow::ensure!(status.success(), "Capture command exited with {}", status);

        let finished_at = started + request.duration;
        sleep_until(finished_at).await;
        self.wait_for_trace(&output, finished_at + self.settle_timeout)
            .await?;

        Ok(output)
    }
}
