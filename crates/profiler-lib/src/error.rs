//! Domain errors surfaced by the library

use crate::alerting::AlertMetricType;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to obtain a usable settings document
#[derive(Debug, Error)]
pub enum PollError {
    #[error("settings endpoint returned an empty body")]
    EmptyResponse,

    #[error("settings document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("settings request failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("settings poll gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<PollError> },
}

/// Step of the upload protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Credentials,
    Upload,
    Commit,
    Index,
}

impl UploadStage {
    /// Metric label
    pub fn as_label(&self) -> &'static str {
        match self {
            UploadStage::Credentials => "credentials",
            UploadStage::Upload => "upload",
            UploadStage::Commit => "commit",
            UploadStage::Index => "index",
        }
    }
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStage::Credentials => write!(f, "credential request"),
            UploadStage::Upload => write!(f, "blob upload"),
            UploadStage::Commit => write!(f, "commit"),
            UploadStage::Index => write!(f, "index publish"),
        }
    }
}

/// Failure to transport a trace artifact
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("trace file {} is unreadable: {source}", path.display())]
    TraceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed after {attempts} attempt(s): {error:#}")]
    Stage {
        stage: UploadStage,
        attempts: u32,
        error: anyhow::Error,
    },

    #[error("upload identity has no {0}")]
    MissingIdentity(&'static str),

    #[error("index is missing required property {0}")]
    IncompleteIndex(&'static str),
}

impl UploadError {
    pub fn stage(&self) -> UploadStage {
        match self {
            UploadError::MissingIdentity(_) => UploadStage::Credentials,
            UploadError::TraceFile { .. } => UploadStage::Upload,
            UploadError::Stage { stage, .. } => *stage,
            UploadError::IncompleteIndex(_) => UploadStage::Index,
        }
    }
}

/// A sample the trigger engine refuses to aggregate
#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("sample value {0} is not finite")]
    NonFinite(f64),

    #[error("sample value {0} is negative")]
    Negative(f64),

    #[error("{0} is not a sampled metric")]
    Untracked(AlertMetricType),
}
