//! Wire contracts of the profiler frontend

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Prefix of the agent-facing API
pub const PROFILER_API_PREFIX: &str = "api/profileragent/v4";

/// Version of the settings protocol this agent speaks
pub const FEATURE_VERSION: &str = "1.0.0";

/// `api-version` of the artifact endpoints
pub const ARTIFACT_API_VERSION: &str = "2020-10-14-preview";

/// Artifact kind in artifact URLs
pub const ARTIFACT_KIND_PROFILE: &str = "profile";

/// Blob metadata keys attached to an uploaded trace
pub mod blob_metadata {
    pub const DATA_CUBE: &str = "spDataCube";
    pub const MACHINE_NAME: &str = "spMachineName";
    pub const START_TIME: &str = "spTraceStartTime";
    pub const PROGRAMMING_LANGUAGE: &str = "spProgrammingLanguage";
    pub const OS_PLATFORM: &str = "spOSPlatform";
    pub const TRACE_FILE_FORMAT: &str = "spTraceFileFormat";
    pub const ROLE_NAME: &str = "RoleName";

    /// Value of `spProgrammingLanguage`
    pub const PROGRAMMING_LANGUAGE_JAVA: &str = "Java";
}

/// Short-lived upload credential for one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobAccessPass {
    /// Blob URL with the SAS token embedded in its query
    pub uri_with_sas_token: String,
    #[serde(default)]
    pub blob_uri: Option<String>,
    #[serde(default)]
    pub sas_token: Option<String>,
}

impl BlobAccessPass {
    /// Pass built from a `Location` header
    pub fn from_location(location: impl Into<String>) -> Self {
        Self {
            uri_with_sas_token: location.into(),
            blob_uri: None,
            sas_token: None,
        }
    }

    pub fn upload_url(&self) -> Result<Url> {
        Url::parse(&self.uri_with_sas_token).context("Upload pass carries an invalid URL")
    }

    /// Blob URL with the SAS token removed, safe to log
    pub fn redacted_url(&self) -> String {
        match self.upload_url() {
            Ok(mut url) => {
                url.set_query(None);
                url.to_string()
            }
            Err(_) => "<invalid>".to_string(),
        }
    }
}

/// Frontend acknowledgement of a committed artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactAcceptedResponse {
    #[serde(default)]
    pub accepted_time: String,
    #[serde(default)]
    pub blob_uri: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub stamp_id: String,
}

/// `yyyy-MM-ddTHH:mm:ss.fffffffZ`, the timestamp format used on the wire
pub fn format_wire_timestamp(timestamp: &DateTime<Utc>) -> String {
    let ticks = (timestamp.timestamp_subsec_nanos() / 100).min(9_999_999);
    format!("{}.{:07}Z", timestamp.format("%Y-%m-%dT%H:%M:%S"), ticks)
}

/// Wrap an ETag in exactly one pair of double quotes
pub fn quoted_etag(etag: &str) -> String {
    format!("\"{}\"", etag.trim().trim_matches('"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_wire_timestamp() {
        let ts = Utc.with_ymd_and_hms(2021, 1, 25, 15, 51, 11).unwrap()
            + chrono::Duration::nanoseconds(90_061_300);
        assert_eq!(format_wire_timestamp(&ts), "2021-01-25T15:51:11.0900613Z");

        let year_one = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_wire_timestamp(&year_one), "0001-01-01T00:00:00.0000000Z");
    }

    #[test]
    fn test_quoted_etag() {
        assert_eq!(quoted_etag("0x8D8C1"), "\"0x8D8C1\"");
        assert_eq!(quoted_etag("\"0x8D8C1\""), "\"0x8D8C1\"");
    }

    #[test]
    fn test_access_pass_from_json_and_redaction() {
        let pass: BlobAccessPass = serde_json::from_str(
            r#"{"uriWithSasToken": "https://store.blob.core.windows.net/c/trace.jfr?sv=1&sig=secret", "unused": 1}"#,
        )
        .unwrap();

        assert_eq!(pass.blob_uri, None);
        assert_eq!(
            pass.redacted_url(),
            "https://store.blob.core.windows.net/c/trace.jfr"
        );
        assert_eq!(BlobAccessPass::from_location("not a url").redacted_url(), "<invalid>");
    }

    #[test]
    fn test_accepted_response_tolerates_missing_fields() {
        let accepted: ArtifactAcceptedResponse =
            serde_json::from_str(r#"{"stampId": "stamp-1", "acceptedTime": "2021-01-25T15:51:11.0900613Z"}"#)
                .unwrap();
        assert_eq!(accepted.stamp_id, "stamp-1");
        assert!(accepted.blob_uri.is_empty());
    }
}
