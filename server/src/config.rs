//! Configuration management for the checker.

use chrono::TimeDelta;
use driftwatch_engine::checkpoint::parse_checkpoint;
use driftwatch_engine::Timestamp;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::loader::DEFAULT_CONCURRENCY;

/// Checker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL of the authoritative local store
    pub local_database_url: String,
    /// PostgreSQL URL of the cloud primary (reloads and repairs)
    pub cloud_database_url: String,
    /// PostgreSQL URL used for bulk cloud reads, defaults to the primary
    pub cloud_read_database_url: Option<String>,
    /// Table holding local records
    pub local_table: String,
    /// Table holding cloud records
    pub cloud_table: String,
    /// Max connections per pool
    pub db_max_connections: u32,
    /// Address of the status endpoint
    pub status_addr: String,
    pub reconcile: ReconcileConfig,
    /// Append divergences as JSON lines to this file
    pub diff_log_path: Option<PathBuf>,
}

/// Options of the reconciliation loop itself.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Start of the first window when no checkpoint can be resumed
    pub start_time: Timestamp,
    /// Stop once the window start passes this time
    pub end_time: Option<Timestamp>,
    /// Window width
    pub step: TimeDelta,
    /// Pause between loop iterations
    pub loop_interval: Duration,
    /// Replication lag budget before a window may be compared
    pub delay: TimeDelta,
    pub batch_size: usize,
    /// Extra attempts for a failed bulk batch
    pub batch_retry: u32,
    /// Bulk batches read at once
    pub batch_concurrency: usize,
    /// Overwrite divergent cloud records with local values
    pub fix: bool,
    pub debug: bool,
    pub checkpoint_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&|var: &str| env::var(var).ok())
    }

    /// Load configuration from any variable lookup.
    pub fn from_vars(vars: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let local_database_url = required(vars, "LOCAL_DATABASE_URL")?;
        let cloud_database_url = required(vars, "CLOUD_DATABASE_URL")?;
        let cloud_read_database_url = vars("CLOUD_READ_DATABASE_URL");

        let local_table = table_name(vars, "LOCAL_TABLE", "local_records")?;
        let cloud_table = table_name(vars, "CLOUD_TABLE", "cloud_records")?;

        let db_max_connections = parsed(vars, "DB_MAX_CONNECTIONS", 10)?;
        let status_addr = vars("STATUS_ADDR").unwrap_or_else(|| "0.0.0.0:7070".to_string());
        let diff_log_path = vars("DIFF_LOG_PATH").map(PathBuf::from);

        Ok(Self {
            local_database_url,
            cloud_database_url,
            cloud_read_database_url,
            local_table,
            cloud_table,
            db_max_connections,
            status_addr,
            reconcile: ReconcileConfig::from_vars(vars)?,
            diff_log_path,
        })
    }
}

impl ReconcileConfig {
    /// Load the loop options from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&|var: &str| env::var(var).ok())
    }

    /// Load the loop options from any variable lookup.
    pub fn from_vars(vars: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let start_time = time(vars, "START_TIME")?.ok_or(ConfigError::Missing("START_TIME"))?;
        let end_time = time(vars, "END_TIME")?;

        let step_secs: i64 = parsed(vars, "STEP_SECS", 60)?;
        if step_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "STEP_SECS",
                reason: "must be positive".to_string(),
            });
        }
        let delay_secs: i64 = parsed(vars, "DELAY_SECS", 300)?;
        if delay_secs < 0 {
            return Err(ConfigError::Invalid {
                var: "DELAY_SECS",
                reason: "must not be negative".to_string(),
            });
        }

        let batch_size: usize = parsed(vars, "BATCH_SIZE", 100)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        let batch_concurrency: usize = parsed(vars, "BATCH_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if batch_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "BATCH_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            start_time,
            end_time,
            step: seconds("STEP_SECS", step_secs)?,
            loop_interval: Duration::from_millis(parsed(vars, "LOOP_INTERVAL_MS", 1000)?),
            delay: seconds("DELAY_SECS", delay_secs)?,
            batch_size,
            batch_retry: parsed(vars, "BATCH_RETRY", 3)?,
            batch_concurrency,
            fix: parsed(vars, "FIX", false)?,
            debug: parsed(vars, "DEBUG", false)?,
            checkpoint_path: vars("CHECKPOINT_PATH")
                .unwrap_or_else(|| "driftwatch.offset".to_string())
                .into(),
        })
    }
}

fn required(
    vars: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    vars(var).ok_or(ConfigError::Missing(var))
}

fn parsed<T>(
    vars: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn seconds(var: &'static str, secs: i64) -> Result<TimeDelta, ConfigError> {
    TimeDelta::try_seconds(secs).ok_or_else(|| ConfigError::Invalid {
        var,
        reason: format!("{secs} seconds is out of range"),
    })
}

fn time(
    vars: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Timestamp>, ConfigError> {
    match vars(var) {
        Some(raw) => parse_checkpoint(&raw)
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Table names are spliced into SQL, so only plain identifiers are allowed.
fn table_name(
    vars: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    let name = vars(var).unwrap_or_else(|| default.to_string());
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(ConfigError::Invalid {
            var,
            reason: format!("'{name}' is not a plain table name"),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid {var} value: {reason}")]
    Invalid { var: &'static str, reason: String },
}
