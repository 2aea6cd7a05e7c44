use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::utils::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings, read once at startup from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub static_dir: String,
    pub token_ttl_hours: i64,
    pub db_max_connections: u32,
    pub body_limit_mb: usize,
    pub retry: RetryPolicy,
    /// Offset of the shop's wall clock from UTC.
    pub business_offset: FixedOffset,
    pub shift_start: NaiveTime,
    pub late_grace_minutes: i64,
    pub late_penalty: Decimal,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any key lookup so it can be exercised without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let max_attempts: u32 = parsed(&lookup, "RETRY_MAX_ATTEMPTS", 3)?;
        let base_delay_ms: u64 = parsed(&lookup, "RETRY_BASE_DELAY_MS", 50)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let shift_start = match lookup("SHIFT_START") {
            Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
                ConfigError::Invalid {
                    name: "SHIFT_START",
                    value: raw.clone(),
                }
            })?,
            None => NaiveTime::from_hms_opt(9, 0, 0).ok_or(ConfigError::Invalid {
                name: "SHIFT_START",
                value: "09:00".to_string(),
            })?,
        };

        let utc_offset_minutes: i32 = parsed(&lookup, "UTC_OFFSET_MINUTES", 0)?;
        let business_offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or(
            ConfigError::Invalid {
                name: "UTC_OFFSET_MINUTES",
                value: utc_offset_minutes.to_string(),
            },
        )?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            port: parsed(&lookup, "PORT", 3000)?,
            static_dir: lookup("STATIC_DIR").unwrap_or_else(|| "static".to_string()),
            token_ttl_hours: parsed(&lookup, "TOKEN_TTL_HOURS", 24)?,
            db_max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            body_limit_mb: parsed(&lookup, "BODY_LIMIT_MB", 10)?,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
            },
            business_offset,
            shift_start,
            late_grace_minutes: parsed(&lookup, "LATE_GRACE_MINUTES", 15)?,
            late_penalty: parsed(&lookup, "LATE_PENALTY", Decimal::ZERO)?,
        })
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.static_dir, "static");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.shift_start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(config.late_penalty, Decimal::ZERO);
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let err = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "JWT_SECRET must be set");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn shift_start_and_offset_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("SHIFT_START", "07:30"),
            ("UTC_OFFSET_MINUTES", "420"),
        ]))
        .unwrap();
        assert_eq!(config.shift_start, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(config.business_offset.local_minus_utc(), 420 * 60);
    }
}
