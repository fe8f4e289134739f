//! Flag-string configuration parser
//!
//! The settings service ships trigger settings as four independent strings of
//! whitespace-delimited `--flag value` tokens, e.g.
//!
//! ```text
//! --cpu-trigger-enabled true --cpu-threshold 80 --cpu-trigger-profilingDuration 30 --cpu-trigger-cooldown 14400
//! --single --mode immediate --immediate-profiling-duration 120 --expiration 5249157885138288517 --settings-moniker Portal_b5bd
//! ```
//!
//! Parsing never fails. Unknown flags and stray tokens are skipped, and a
//! flag whose value cannot be parsed is treated as absent while the rest of
//! the section is still applied.

use super::config::{
    AlertConfiguration, AlertMetricType, AlertingConfiguration, CollectionPlanConfiguration,
    DefaultConfiguration, EngineMode,
};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Low 62 bits of a binary date hold the tick count; the top two carry the kind
const BINARY_DATE_TICKS_MASK: i64 = 0x3fff_ffff_ffff_ffff;

/// Ticks are 100ns intervals
const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch
const YEAR_ONE_UNIX_OFFSET_SECS: i64 = -62_135_596_800;

#[derive(Debug, Error)]
enum FlagError {
    #[error("missing value")]
    MissingValue,
    #[error("invalid boolean '{0}'")]
    InvalidBool(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("binary date {0} is out of range")]
    DateOutOfRange(i64),
}

type ApplyValue<B> = fn(&mut B, &str) -> Result<(), FlagError>;

enum FlagKind<B> {
    /// Presence-only flag
    Switch(fn(&mut B)),
    /// Flag consuming the following token
    Value(ApplyValue<B>),
}

struct Flag<B> {
    name: &'static str,
    kind: FlagKind<B>,
}

const CPU_FLAGS: &[Flag<AlertConfiguration>] = &[
    Flag {
        name: "cpu-trigger-enabled",
        kind: FlagKind::Value(set_alert_enabled),
    },
    Flag {
        name: "cpu-threshold",
        kind: FlagKind::Value(set_alert_threshold),
    },
    Flag {
        name: "cpu-trigger-profilingDuration",
        kind: FlagKind::Value(set_alert_profile_duration),
    },
    Flag {
        name: "cpu-trigger-cooldown",
        kind: FlagKind::Value(set_alert_cooldown),
    },
];

const MEMORY_FLAGS: &[Flag<AlertConfiguration>] = &[
    Flag {
        name: "memory-trigger-enabled",
        kind: FlagKind::Value(set_alert_enabled),
    },
    Flag {
        name: "memory-threshold",
        kind: FlagKind::Value(set_alert_threshold),
    },
    Flag {
        name: "memory-trigger-profilingDuration",
        kind: FlagKind::Value(set_alert_profile_duration),
    },
    Flag {
        name: "memory-trigger-cooldown",
        kind: FlagKind::Value(set_alert_cooldown),
    },
];

const SAMPLING_FLAGS: &[Flag<DefaultConfiguration>] = &[
    Flag {
        name: "sampling-enabled",
        kind: FlagKind::Value(|config, value| {
            config.sampling_enabled = parse_bool(value)?;
            Ok(())
        }),
    },
    Flag {
        name: "sampling-rate",
        kind: FlagKind::Value(|config, value| {
            config.sampling_rate = parse_finite(value)?;
            Ok(())
        }),
    },
    Flag {
        name: "sampling-profiling-duration",
        kind: FlagKind::Value(|config, value| {
            config.sampling_profile_duration = parse_seconds(value)?;
            Ok(())
        }),
    },
];

const COLLECTION_PLAN_FLAGS: &[Flag<CollectionPlanConfiguration>] = &[
    Flag {
        name: "single",
        kind: FlagKind::Switch(|plan| plan.single = true),
    },
    Flag {
        name: "mode",
        kind: FlagKind::Value(|plan, value| {
            plan.mode = EngineMode::parse(value);
            Ok(())
        }),
    },
    Flag {
        name: "immediate-profiling-duration",
        kind: FlagKind::Value(|plan, value| {
            plan.immediate_profiling_duration = parse_seconds(value)?;
            Ok(())
        }),
    },
    Flag {
        name: "expiration",
        kind: FlagKind::Value(|plan, value| {
            let raw: i64 = value
                .parse()
                .map_err(|_| FlagError::InvalidNumber(value.to_string()))?;
            plan.expiration = decode_binary_date(raw).ok_or(FlagError::DateOutOfRange(raw))?;
            Ok(())
        }),
    },
    Flag {
        name: "settings-moniker",
        kind: FlagKind::Value(|plan, value| {
            plan.settings_moniker = value.to_string();
            Ok(())
        }),
    },
];

/// Parser for the trigger configuration mini-language
pub struct ConfigStringParser;

impl ConfigStringParser {
    /// Parse the four configuration sections into a complete snapshot
    ///
    /// A `None` or empty section yields that section's disabled defaults.
    pub fn parse(
        cpu_config: Option<&str>,
        memory_config: Option<&str>,
        default_config: Option<&str>,
        collection_plan: Option<&str>,
    ) -> AlertingConfiguration {
        AlertingConfiguration {
            cpu_alert: Self::parse_alert(AlertMetricType::Cpu, cpu_config),
            memory_alert: Self::parse_alert(AlertMetricType::Memory, memory_config),
            default_configuration: Self::parse_default_configuration(default_config),
            collection_plan: Self::parse_collection_plan(collection_plan),
        }
    }

    /// Parse one metric's trigger section
    pub fn parse_alert(metric_type: AlertMetricType, input: Option<&str>) -> AlertConfiguration {
        let flags = match metric_type {
            AlertMetricType::Cpu => CPU_FLAGS,
            AlertMetricType::Memory => MEMORY_FLAGS,
            AlertMetricType::Manual => &[],
        };

        let mut config = AlertConfiguration::disabled(metric_type);
        apply_flags(metric_type.as_str(), input, flags, &mut config);
        config
    }

    pub fn parse_default_configuration(input: Option<&str>) -> DefaultConfiguration {
        let mut config = DefaultConfiguration::default();
        apply_flags("sampling", input, SAMPLING_FLAGS, &mut config);
        config
    }

    pub fn parse_collection_plan(input: Option<&str>) -> CollectionPlanConfiguration {
        let mut plan = CollectionPlanConfiguration::disabled();
        apply_flags("collection_plan", input, COLLECTION_PLAN_FLAGS, &mut plan);
        plan
    }
}

/// Decode a binary-encoded date (100ns ticks since 0001-01-01T00:00:00Z)
pub fn decode_binary_date(value: i64) -> Option<DateTime<Utc>> {
    let ticks = value & BINARY_DATE_TICKS_MASK;
    let secs = ticks / TICKS_PER_SECOND + YEAR_ONE_UNIX_OFFSET_SECS;
    let nanos = (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;

    Utc.timestamp_opt(secs, nanos as u32).single()
}

fn apply_flags<B>(section: &str, input: Option<&str>, flags: &[Flag<B>], target: &mut B) {
    let Some(input) = input else {
        return;
    };

    let mut tokens = input.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        let Some(name) = token.strip_prefix("--") else {
            debug!(section, token, "Skipping stray configuration token");
            continue;
        };

        let Some(flag) = flags.iter().find(|flag| flag.name == name) else {
            continue;
        };

        let result = match &flag.kind {
            FlagKind::Switch(apply) => {
                apply(target);
                Ok(())
            }
            FlagKind::Value(apply) => match tokens.next_if(|next| !next.starts_with("--")) {
                Some(value) => apply(target, value),
                None => Err(FlagError::MissingValue),
            },
        };

        if let Err(e) = result {
            debug!(section, flag = name, error = %e, "Ignoring invalid configuration flag");
        }
    }
}

fn set_alert_enabled(config: &mut AlertConfiguration, value: &str) -> Result<(), FlagError> {
    config.enabled = parse_bool(value)?;
    Ok(())
}

fn set_alert_threshold(config: &mut AlertConfiguration, value: &str) -> Result<(), FlagError> {
    config.threshold = parse_finite(value)?;
    Ok(())
}

fn set_alert_profile_duration(
    config: &mut AlertConfiguration,
    value: &str,
) -> Result<(), FlagError> {
    config.profile_duration = parse_seconds(value)?;
    Ok(())
}

fn set_alert_cooldown(config: &mut AlertConfiguration, value: &str) -> Result<(), FlagError> {
    config.cooldown = parse_seconds(value)?;
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, FlagError> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(FlagError::InvalidBool(value.to_string()))
    }
}

fn parse_finite<F>(value: &str) -> Result<F, FlagError>
where
    F: std::str::FromStr + Into<f64> + Copy,
{
    match value.parse::<F>() {
        Ok(parsed) if parsed.into().is_finite() => Ok(parsed),
        _ => Err(FlagError::InvalidNumber(value.to_string())),
    }
}

fn parse_seconds(value: &str) -> Result<Duration, FlagError> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| FlagError::InvalidNumber(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU: &str = "--cpu-trigger-enabled true --cpu-threshold 80 --cpu-trigger-profilingDuration 30 --cpu-trigger-cooldown 14400";
    const MEMORY: &str = "--memory-trigger-enabled true --memory-threshold 20 --memory-trigger-profilingDuration 120 --memory-trigger-cooldown 14400";
    const SAMPLING: &str = "--sampling-enabled true --sampling-rate 5 --sampling-profiling-duration 120";
    const PLAN: &str = "--single --mode immediate --immediate-profiling-duration 120 --expiration 5249157885138288517 --settings-moniker a-settings-moniker";

    fn expected_expiration() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 25, 15, 51, 11).unwrap()
            + chrono::Duration::nanoseconds(90_061_300)
    }

    #[test]
    fn test_all_sections_absent_yield_disabled_defaults() {
        let config = ConfigStringParser::parse(None, None, None, None);

        assert!(!config.cpu_alert.enabled);
        assert!(!config.memory_alert.enabled);
        assert!(!config.collection_plan.single);
        assert!(!config.default_configuration.sampling_enabled);
        assert_eq!(config, AlertingConfiguration::disabled());
    }

    #[test]
    fn test_empty_sections_yield_disabled_defaults() {
        let config = ConfigStringParser::parse(Some(""), Some("   "), Some(""), Some(""));
        assert_eq!(config, AlertingConfiguration::disabled());
    }

    #[test]
    fn test_full_configuration() {
        let config = ConfigStringParser::parse(Some(CPU), Some(MEMORY), Some(SAMPLING), Some(PLAN));

        let expected = AlertingConfiguration {
            cpu_alert: AlertConfiguration::builder(AlertMetricType::Cpu)
                .enabled(true)
                .threshold(80.0)
                .profile_duration(Duration::from_secs(30))
                .cooldown(Duration::from_secs(14400))
                .build(),
            memory_alert: AlertConfiguration::builder(AlertMetricType::Memory)
                .enabled(true)
                .threshold(20.0)
                .profile_duration(Duration::from_secs(120))
                .cooldown(Duration::from_secs(14400))
                .build(),
            default_configuration: DefaultConfiguration::builder()
                .sampling_enabled(true)
                .sampling_rate(5.0)
                .sampling_profile_duration(Duration::from_secs(120))
                .build(),
            collection_plan: CollectionPlanConfiguration {
                single: true,
                mode: EngineMode::Immediate,
                expiration: expected_expiration(),
                immediate_profiling_duration: Duration::from_secs(120),
                settings_moniker: "a-settings-moniker".to_string(),
            },
        };

        assert_eq!(config, expected);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let first = ConfigStringParser::parse(Some(CPU), Some(MEMORY), Some(SAMPLING), Some(PLAN));
        let second = ConfigStringParser::parse(Some(CPU), Some(MEMORY), Some(SAMPLING), Some(PLAN));
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_binary_date() {
        assert_eq!(decode_binary_date(5249157885138288517), Some(expected_expiration()));

        // Zero ticks is the year-one sentinel
        let year_one = decode_binary_date(0).unwrap();
        assert_eq!(year_one.timestamp(), YEAR_ONE_UNIX_OFFSET_SECS);
    }

    #[test]
    fn test_bad_value_does_not_abort_section() {
        let config = ConfigStringParser::parse_alert(
            AlertMetricType::Cpu,
            Some("--cpu-trigger-enabled yes --cpu-threshold abc --cpu-trigger-profilingDuration 30 --cpu-trigger-cooldown 60"),
        );

        assert!(!config.enabled);
        assert_eq!(config.threshold, 0.0);
        assert_eq!(config.profile_duration, Duration::from_secs(30));
        assert_eq!(config.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_value_followed_by_flag() {
        let config = ConfigStringParser::parse_alert(
            AlertMetricType::Memory,
            Some("--memory-threshold --memory-trigger-enabled TRUE"),
        );

        assert_eq!(config.threshold, 0.0);
        assert!(config.enabled);
    }

    #[test]
    fn test_trailing_flag_without_value() {
        let config = ConfigStringParser::parse_default_configuration(Some(
            "--sampling-enabled true --sampling-rate",
        ));

        assert!(config.sampling_enabled);
        assert_eq!(config.sampling_rate, 0.0);
    }

    #[test]
    fn test_unknown_flags_and_extra_whitespace_are_ignored() {
        let config = ConfigStringParser::parse_alert(
            AlertMetricType::Cpu,
            Some("  --cpu-future-flag 12   --cpu-threshold   55.5\t--memory-threshold 10 stray "),
        );

        assert_eq!(config.threshold, 55.5);
        assert!(!config.enabled);
    }

    #[test]
    fn test_non_finite_threshold_is_rejected() {
        let config =
            ConfigStringParser::parse_alert(AlertMetricType::Cpu, Some("--cpu-threshold NaN"));
        assert_eq!(config.threshold, 0.0);

        let config =
            ConfigStringParser::parse_alert(AlertMetricType::Cpu, Some("--cpu-threshold inf"));
        assert_eq!(config.threshold, 0.0);
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let config = ConfigStringParser::parse_alert(
            AlertMetricType::Cpu,
            Some("--cpu-trigger-cooldown -5"),
        );
        assert_eq!(config.cooldown, Duration::ZERO);
    }

    #[test]
    fn test_collection_plan_bad_expiration_stays_expired() {
        let plan = ConfigStringParser::parse_collection_plan(Some(
            "--single --mode immediate --expiration soon --settings-moniker m1",
        ));

        assert!(plan.single);
        assert_eq!(plan.mode, EngineMode::Immediate);
        assert_eq!(plan.expiration, DateTime::<Utc>::default());
        assert_eq!(plan.settings_moniker, "m1");
        assert!(!plan.is_active_at(Utc::now()));
    }

    #[test]
    fn test_collection_plan_other_mode() {
        let plan = ConfigStringParser::parse_collection_plan(Some("--single --mode scheduled"));
        assert_eq!(plan.mode, EngineMode::Other("scheduled".to_string()));
    }
}
