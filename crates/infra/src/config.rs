//! Runtime configuration, read from the environment.

use std::time::Duration;

use thiserror::Error;

use warden_auth::MAX_DURATION_MINUTES;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const STORE_TIMEOUT_MS: &str = "WARDEN_STORE_TIMEOUT_MS";
pub const SWEEP_INTERVAL_SECS: &str = "WARDEN_SWEEP_INTERVAL_SECS";
pub const MAX_JIT_MINUTES: &str = "WARDEN_MAX_JIT_MINUTES";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings shared by the engine, workflow and sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
    /// Postgres URL; only the persistent wiring needs it.
    pub database_url: Option<String>,
    /// Deadline applied to every store call made by the core.
    pub store_timeout: Duration,
    /// Period of the expiration sweeper.
    pub sweep_interval: Duration,
    /// Upper bound for escalation and temporary-grant durations.
    pub max_jit_minutes: u32,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            store_timeout: Duration::from_millis(5_000),
            sweep_interval: Duration::from_secs(60),
            max_jit_minutes: MAX_DURATION_MINUTES,
        }
    }
}

impl WardenConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup(DATABASE_URL).filter(|v| !v.trim().is_empty());

        let store_timeout = parse_positive(&lookup, STORE_TIMEOUT_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);

        let sweep_interval = parse_positive(&lookup, SWEEP_INTERVAL_SECS)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let max_jit_minutes = match parse_positive(&lookup, MAX_JIT_MINUTES)? {
            Some(v) => u32::try_from(v)
                .unwrap_or(u32::MAX)
                .min(MAX_DURATION_MINUTES),
            None => defaults.max_jit_minutes,
        };

        Ok(Self {
            database_url,
            store_timeout,
            sweep_interval,
            max_jit_minutes,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL))
    }
}

fn parse_positive<F>(lookup: &F, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };

    let value: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })?;

    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = WardenConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(
            config.require_database_url(),
            Err(ConfigError::Missing(DATABASE_URL))
        );
    }

    #[test]
    fn reads_all_variables() {
        let config = WardenConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://localhost/warden"),
            (STORE_TIMEOUT_MS, "250"),
            (SWEEP_INTERVAL_SECS, "5"),
            (MAX_JIT_MINUTES, "120"),
        ]))
        .unwrap();

        assert_eq!(config.require_database_url(), Ok("postgres://localhost/warden"));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.max_jit_minutes, 120);
    }

    #[test]
    fn max_jit_minutes_is_capped_at_one_day() {
        let config = WardenConfig::from_lookup(lookup(&[(MAX_JIT_MINUTES, "99999")])).unwrap();
        assert_eq!(config.max_jit_minutes, MAX_DURATION_MINUTES);
    }

    #[test]
    fn rejects_garbage_and_zero() {
        assert!(matches!(
            WardenConfig::from_lookup(lookup(&[(STORE_TIMEOUT_MS, "soon")])),
            Err(ConfigError::Invalid { var: STORE_TIMEOUT_MS, .. })
        ));
        assert!(matches!(
            WardenConfig::from_lookup(lookup(&[(SWEEP_INTERVAL_SECS, "0")])),
            Err(ConfigError::Invalid { var: SWEEP_INTERVAL_SECS, .. })
        ));
    }
}
