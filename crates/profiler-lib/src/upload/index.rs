//! Index entry announcing an uploaded profile

use crate::error::UploadError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::collections::BTreeMap;

/// Property and metric names of the index entry
pub mod keys {
    pub const SOURCE: &str = "Source";
    pub const FILE_ID: &str = "FileId";
    pub const STAMP_ID: &str = "StampId";
    pub const DATA_CUBE: &str = "DataCube";
    pub const MACHINE_NAME: &str = "MachineName";
    pub const PROCESS_ID: &str = "ProcessId";
    pub const OPERATING_SYSTEM: &str = "OperatingSystem";
    pub const ARTIFACT_KIND: &str = "ArtifactKind";
    pub const ARTIFACT_ID: &str = "ArtifactId";
    pub const EXTENSION: &str = "Extension";
    pub const ETL_FILE_SESSION_ID: &str = "EtlFileSessionId";

    pub const AVERAGE_CPU_USAGE: &str = "AverageCPUUsage";
    pub const AVERAGE_MEMORY_USAGE: &str = "AverageMemoryUsage";
}

/// Artifact kind of every trace this agent uploads
pub const ARTIFACT_KIND_PROFILE: &str = "Profile";

/// Extension of JFR traces
pub const TRACE_EXTENSION: &str = "jfr";

const FILE_ID_BYTES: usize = 9;

/// Random file id, base64 encoded
pub fn new_file_id() -> String {
    let bytes: [u8; FILE_ID_BYTES] = rand::random();
    STANDARD.encode(bytes)
}

/// Properties and metrics emitted once a profile has been committed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProfilerIndex {
    properties: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
}

impl ServiceProfilerIndex {
    pub fn builder() -> ServiceProfilerIndexBuilder {
        ServiceProfilerIndexBuilder::default()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }
}

/// Builder for `ServiceProfilerIndex`
///
/// Missing usage averages are recorded as zero.
#[derive(Debug, Default)]
pub struct ServiceProfilerIndexBuilder {
    source: Option<String>,
    file_id: Option<String>,
    stamp_id: Option<String>,
    data_cube: Option<String>,
    machine_name: Option<String>,
    process_id: Option<String>,
    operating_system: Option<String>,
    artifact_id: Option<String>,
    extension: Option<String>,
    etl_file_session_id: Option<String>,
    cpu_usage: Option<f64>,
    memory_usage: Option<f64>,
}

impl ServiceProfilerIndexBuilder {
    pub fn source(mut self, trigger_name: impl Into<String>) -> Self {
        self.source = Some(trigger_name.into());
        self
    }

    pub fn file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn stamp_id(mut self, stamp_id: impl Into<String>) -> Self {
        self.stamp_id = Some(stamp_id.into());
        self
    }

    pub fn data_cube(mut self, data_cube: impl Into<String>) -> Self {
        self.data_cube = Some(data_cube.into());
        self
    }

    pub fn machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = Some(machine_name.into());
        self
    }

    pub fn process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }

    pub fn operating_system(mut self, operating_system: impl Into<String>) -> Self {
        self.operating_system = Some(operating_system.into());
        self
    }

    pub fn artifact_id(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Accepted time of the commit, in the seven-digit wire format
    pub fn etl_file_session_id(mut self, timestamp: impl Into<String>) -> Self {
        self.etl_file_session_id = Some(timestamp.into());
        self
    }

    pub fn cpu_usage(mut self, average: Option<f64>) -> Self {
        self.cpu_usage = average;
        self
    }

    pub fn memory_usage(mut self, average: Option<f64>) -> Self {
        self.memory_usage = average;
        self
    }

    pub fn build(self) -> Result<ServiceProfilerIndex, UploadError> {
        let mut properties = BTreeMap::new();

        let required = [
            (keys::SOURCE, self.source),
            (keys::STAMP_ID, self.stamp_id),
            (keys::DATA_CUBE, self.data_cube),
            (keys::MACHINE_NAME, self.machine_name),
            (keys::PROCESS_ID, self.process_id),
            (keys::ARTIFACT_ID, self.artifact_id),
            (keys::ETL_FILE_SESSION_ID, self.etl_file_session_id),
        ];
        for (key, value) in required {
            match value.filter(|v| !v.is_empty()) {
                Some(value) => properties.insert(key.to_string(), value),
                None => return Err(UploadError::IncompleteIndex(key)),
            };
        }

        properties.insert(
            keys::FILE_ID.to_string(),
            self.file_id.unwrap_or_else(new_file_id),
        );
        properties.insert(
            keys::OPERATING_SYSTEM.to_string(),
            self.operating_system
                .unwrap_or_else(|| super::os_platform_description().to_string()),
        );
        properties.insert(keys::ARTIFACT_KIND.to_string(), ARTIFACT_KIND_PROFILE.to_string());
        properties.insert(
            keys::EXTENSION.to_string(),
            self.extension
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| TRACE_EXTENSION.to_string()),
        );

        let mut metrics = BTreeMap::new();
        metrics.insert(keys::AVERAGE_CPU_USAGE.to_string(), self.cpu_usage.unwrap_or(0.0));
        metrics.insert(keys::AVERAGE_MEMORY_USAGE.to_string(), self.memory_usage.unwrap_or(0.0));

        Ok(ServiceProfilerIndex { properties, metrics })
    }
}
