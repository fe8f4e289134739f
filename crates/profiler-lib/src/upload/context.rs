//! Everything the upload protocol needs to know about one captured trace

use super::index::TRACE_EXTENSION;
use crate::alerting::{AlertMetricType, UsageAverages};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

/// A finished trace waiting to be uploaded
#[derive(Debug, Clone, PartialEq)]
pub struct UploadContext {
    /// Artifact id; also the id announced when the session was triggered
    pub profile_id: Uuid,
    pub trigger: AlertMetricType,
    pub session_start: DateTime<Utc>,
    pub trace_file: PathBuf,
    pub usage: UsageAverages,
    pub machine_name: String,
    /// Application id the artifact is filed under
    pub data_cube: String,
    /// Trace format, also used as the artifact extension
    pub file_format: String,
}

impl UploadContext {
    pub fn builder() -> UploadContextBuilder {
        UploadContextBuilder::new()
    }

    /// Trigger name recorded in the index, e.g. `JFR-MEMORY`
    pub fn trigger_name(&self) -> String {
        format!("JFR-{}", self.trigger)
    }
}

/// Builder for `UploadContext`
#[derive(Debug, Default)]
pub struct UploadContextBuilder {
    profile_id: Option<Uuid>,
    trigger: Option<AlertMetricType>,
    session_start: Option<DateTime<Utc>>,
    trace_file: Option<PathBuf>,
    usage: UsageAverages,
    machine_name: Option<String>,
    data_cube: Option<String>,
    file_format: Option<String>,
}

impl UploadContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_id(mut self, profile_id: Uuid) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    pub fn trigger(mut self, trigger: AlertMetricType) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn session_start(mut self, start: DateTime<Utc>) -> Self {
        self.session_start = Some(start);
        self
    }

    pub fn trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_file = Some(path.into());
        self
    }

    pub fn usage(mut self, usage: UsageAverages) -> Self {
        self.usage = usage;
        self
    }

    pub fn machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = Some(machine_name.into());
        self
    }

    pub fn data_cube(mut self, data_cube: impl Into<String>) -> Self {
        self.data_cube = Some(data_cube.into());
        self
    }

    pub fn file_format(mut self, file_format: impl Into<String>) -> Self {
        self.file_format = Some(file_format.into());
        self
    }

    /// Build the context; the profile id is generated when not set and the
    /// file format defaults to JFR
    pub fn build(self) -> Result<UploadContext> {
        let trigger = self
            .trigger
            .ok_or_else(|| anyhow::anyhow!("Trigger is required"))?;
        let trace_file = self
            .trace_file
            .ok_or_else(|| anyhow::anyhow!("Trace file is required"))?;
        let session_start = self
            .session_start
            .ok_or_else(|| anyhow::anyhow!("Session start is required"))?;
        let machine_name = self
            .machine_name
            .ok_or_else(|| anyhow::anyhow!("Machine name is required"))?;
        let data_cube = self
            .data_cube
            .ok_or_else(|| anyhow::anyhow!("Data cube is required"))?;

        Ok(UploadContext {
            profile_id: self.profile_id.unwrap_or_else(Uuid::new_v4),
            trigger,
            session_start,
            trace_file,
            usage: self.usage,
            machine_name,
            data_cube,
            file_format: self
                .file_format
                .unwrap_or_else(|| TRACE_EXTENSION.to_string()),
        })
    }
}
