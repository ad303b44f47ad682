use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} out of range: {value}")]
    OutOfRange { var: &'static str, value: String },
}

/// Knobs the engine itself reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingConfig {
    /// Used when a tenant has no `cancellationWindowHours` of its own.
    pub default_cancellation_window_hours: u32,
    pub slot_minutes: u32,
    pub monthly_occurrence_limit: u32,
    /// Offset of the studio-local clock that hours, rules and recurrence use.
    pub utc_offset: FixedOffset,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_cancellation_window_hours: 48,
            slot_minutes: 20,
            monthly_occurrence_limit: 12,
            utc_offset: Utc.fix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub directory_file: Option<PathBuf>,
    pub scheduling: SchedulingConfig,
    pub notify: NotifyConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = SchedulingConfig::default();
        let notify_defaults = NotifyConfig::default();

        let offset_minutes: i32 = parse_or(&lookup, "CADENCE_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::OutOfRange {
                var: "CADENCE_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;

        let slot_minutes: u32 = parse_or(&lookup, "CADENCE_SLOT_MINUTES", defaults.slot_minutes)?;
        if slot_minutes == 0 || slot_minutes > 24 * 60 {
            return Err(ConfigError::OutOfRange {
                var: "CADENCE_SLOT_MINUTES",
                value: slot_minutes.to_string(),
            });
        }

        let max_attempts: u32 =
            parse_or(&lookup, "CADENCE_NOTIFY_MAX_ATTEMPTS", notify_defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                var: "CADENCE_NOTIFY_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        let backoff_ms: u64 = parse_or(
            &lookup,
            "CADENCE_NOTIFY_BACKOFF_MS",
            notify_defaults.initial_backoff.as_millis() as u64,
        )?;

        Ok(Self {
            data_dir: lookup("CADENCE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            log_level: lookup("CADENCE_LOG").unwrap_or_else(|| "info".into()),
            metrics_port: parse_opt(&lookup, "CADENCE_METRICS_PORT")?,
            compact_threshold: parse_or(&lookup, "CADENCE_COMPACT_THRESHOLD", 1000)?,
            directory_file: lookup("CADENCE_DIRECTORY_FILE").map(PathBuf::from),
            scheduling: SchedulingConfig {
                default_cancellation_window_hours: parse_or(
                    &lookup,
                    "CADENCE_CANCELLATION_WINDOW_HOURS",
                    defaults.default_cancellation_window_hours,
                )?,
                slot_minutes,
                monthly_occurrence_limit: parse_or(
                    &lookup,
                    "CADENCE_MONTHLY_OCCURRENCES",
                    defaults.monthly_occurrence_limit,
                )?,
                utc_offset,
            },
            notify: NotifyConfig {
                max_attempts,
                initial_backoff: Duration::from_millis(backoff_ms),
                queue_capacity: parse_or(
                    &lookup,
                    "CADENCE_NOTIFY_QUEUE",
                    notify_defaults.queue_capacity,
                )?,
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("sessions.wal")
    }
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.scheduling, SchedulingConfig::default());
        assert_eq!(config.scheduling.default_cancellation_window_hours, 48);
        assert_eq!(config.scheduling.slot_minutes, 20);
        assert_eq!(config.notify, NotifyConfig::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/sessions.wal"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("CADENCE_DATA_DIR", "/var/lib/cadence"),
            ("CADENCE_METRICS_PORT", "9100"),
            ("CADENCE_CANCELLATION_WINDOW_HOURS", "24"),
            ("CADENCE_SLOT_MINUTES", "30"),
            ("CADENCE_UTC_OFFSET_MINUTES", "-300"),
            ("CADENCE_NOTIFY_BACKOFF_MS", "50"),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/cadence"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.scheduling.default_cancellation_window_hours, 24);
        assert_eq!(config.scheduling.slot_minutes, 30);
        assert_eq!(config.scheduling.utc_offset.local_minus_utc(), -300 * 60);
        assert_eq!(config.notify.initial_backoff, Duration::from_millis(50));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = from_pairs(&[("CADENCE_METRICS_PORT", "ninety")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "CADENCE_METRICS_PORT",
                value: "ninety".into()
            }
        );
        assert!(from_pairs(&[("CADENCE_SLOT_MINUTES", "0")]).is_err());
        assert!(from_pairs(&[("CADENCE_UTC_OFFSET_MINUTES", "100000")]).is_err());
        assert!(from_pairs(&[("CADENCE_NOTIFY_MAX_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn huge_offset_is_out_of_range() {
        for raw in ["2147483647", "-2147483648", "35791395"] {
            let err = from_pairs(&[("CADENCE_UTC_OFFSET_MINUTES", raw)]).unwrap_err();
            assert_eq!(
                err,
                ConfigError::OutOfRange {
                    var: "CADENCE_UTC_OFFSET_MINUTES",
                    value: raw.into()
                }
            );
        }
    }
}
