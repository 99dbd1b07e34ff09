//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Largest accepted `exhaustive_limit`; 8! orderings is already 40320 assignments.
pub const MAX_EXHAUSTIVE_LIMIT: usize = 8;

/// Dispatch engine configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Concurrency limit used when the caller does not supply one.
    pub default_concurrency: usize,
    /// How long `request_stop` waits for in-flight results to drain.
    pub stop_timeout: Duration,
    /// Upper bound on a single resource acquisition.
    pub provision_timeout: Duration,
    /// Largest flattened sequence whose permutations are enumerated exhaustively.
    pub exhaustive_limit: usize,
    /// Number of shuffled orderings sampled above `exhaustive_limit`.
    pub sample_pool_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 2,
            stop_timeout: Duration::from_secs(30),
            provision_timeout: Duration::from_secs(30),
            exhaustive_limit: 7,
            sample_pool_size: 100,
        }
    }
}

impl DispatchConfig {
    /// Build a config from `FLEET_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let default_concurrency: usize =
            env_or("FLEET_CONCURRENCY", defaults.default_concurrency)?;
        if default_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FLEET_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            default_concurrency,
            stop_timeout: Duration::from_secs(env_or(
                "FLEET_STOP_TIMEOUT_SECS",
                defaults.stop_timeout.as_secs(),
            )?),
            provision_timeout: Duration::from_secs(env_or(
                "FLEET_PROVISION_TIMEOUT_SECS",
                defaults.provision_timeout.as_secs(),
            )?),
            exhaustive_limit: check_exhaustive_limit(env_or(
                "FLEET_EXHAUSTIVE_LIMIT",
                defaults.exhaustive_limit,
            )?)?,
            sample_pool_size: env_or("FLEET_SAMPLE_POOL", defaults.sample_pool_size)?.max(1),
        })
    }
}

/// Settings for the `fleet-runner` binary.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker roster file (endpoint line followed by worker ids).
    pub roster_path: PathBuf,
    /// Task sequence in `name*count,name` form.
    pub sequence: String,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
    /// How often progress is printed.
    pub poll_interval: Duration,
}

impl RunnerConfig {
    /// Read the binary's settings; `FLEET_SEQUENCE` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sequence = std::env::var("FLEET_SEQUENCE")
            .map_err(|_| ConfigError::MissingEnvVar("FLEET_SEQUENCE".to_string()))?;

        Ok(Self {
            roster_path: std::env::var("FLEET_ROSTER")
                .unwrap_or_else(|_| "resource/workers.txt".to_string())
                .into(),
            sequence,
            log_dir: std::env::var("FLEET_LOG_DIR")
                .unwrap_or_else(|_| "logs".to_string())
                .into(),
            poll_interval: Duration::from_millis(env_or("FLEET_POLL_INTERVAL_MS", 1000u64)?),
        })
    }
}

fn check_exhaustive_limit(limit: usize) -> Result<usize, ConfigError> {
    if limit > MAX_EXHAUSTIVE_LIMIT {
        return Err(ConfigError::InvalidValue {
            key: "FLEET_EXHAUSTIVE_LIMIT".to_string(),
            message: format!("{limit} exceeds the maximum of {MAX_EXHAUSTIVE_LIMIT}"),
        });
    }
    Ok(limit)
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
