//! Raw settings document served by the profiler frontend

use crate::alerting::{AlertingConfiguration, ConfigStringParser};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch
const YEAR_ONE_UNIX_OFFSET_SECS: i64 = 62_135_596_800;

/// Sentinel `lastModified` of a document that was never configured
pub fn never_configured() -> DateTime<Utc> {
    DateTime::<Utc>::default() - chrono::Duration::seconds(YEAR_ONE_UNIX_OFFSET_SECS)
}

/// Profiler settings as delivered by the settings endpoint
///
/// Unknown fields are ignored. Dates that are missing or fail to parse fall
/// back to [`never_configured`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilerConfiguration {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default = "never_configured", with = "lenient_date")]
    pub last_modified: DateTime<Utc>,

    #[serde(default = "never_configured", with = "lenient_date")]
    pub enabled_last_modified: DateTime<Utc>,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub collection_plan: Option<String>,

    #[serde(default)]
    pub cpu_trigger_configuration: Option<String>,

    #[serde(default)]
    pub memory_trigger_configuration: Option<String>,

    #[serde(default)]
    pub default_configuration: Option<String>,

    #[serde(default)]
    pub agent_concurrency: i32,
}

impl Default for ProfilerConfiguration {
    fn default() -> Self {
        Self {
            id: None,
            last_modified: never_configured(),
            enabled_last_modified: never_configured(),
            enabled: false,
            collection_plan: None,
            cpu_trigger_configuration: None,
            memory_trigger_configuration: None,
            default_configuration: None,
            agent_concurrency: 0,
        }
    }
}

impl ProfilerConfiguration {
    /// False while `lastModified` still holds the year-one sentinel
    pub fn has_been_configured(&self) -> bool {
        self.last_modified != never_configured()
    }

    /// Whether the document should drive triggering at all
    pub fn is_active(&self) -> bool {
        self.enabled && self.has_been_configured()
    }

    /// Parse the embedded flag strings
    pub fn to_alerting_config(&self) -> AlertingConfiguration {
        ConfigStringParser::parse(
            self.cpu_trigger_configuration.as_deref(),
            self.memory_trigger_configuration.as_deref(),
            self.default_configuration.as_deref(),
            self.collection_plan.as_deref(),
        )
    }
}

/// Format a timestamp the way the settings endpoint expects it back
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parse RFC 3339 dates, or offset-less ones as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

mod lenient_date {
    use super::{format_timestamp, never_configured, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(never_configured))
    }
}
