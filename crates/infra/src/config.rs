//! Environment configuration, read once at startup.
//!
//! | variable | default |
//! |---|---|
//! | `TASKQ_MAX_RETRIES` | `3` |
//! | `TASKQ_BACKOFF_SECS` | `1,4,9` (k² seconds for the configured bound) |
//! | `TASKQ_POLL_INTERVAL_MS` | `2000` |
//! | `TASKQ_UNKNOWN_KIND` | `consume_retry` |
//! | `TASKQ_EXECUTION_TIMEOUT_MS` | unset |
//! | `TASKQ_FAILED_JOBS_LOG` | `failed_jobs.log` |
//! | `TASKQ_ALLOWED_KINDS` | `send_email,process_data,generate_report` |
//! | `DATABASE_URL` | unset (in-memory store) |
//! | `REDIS_URL` | unset (in-memory broker) |
//! | `TASKQ_QUEUE_KEY` | `job_queue` |
//! | `TASKQ_BIND_ADDR` | `0.0.0.0:5000` |
//!
//! A value that is set but cannot be parsed is an error, never a silent default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use taskq_core::{JobKind, RetryPolicy};

use crate::worker::{UnknownKindPolicy, WorkerConfig};

pub const DEFAULT_ALLOWED_KINDS: [&str; 3] = ["send_email", "process_data", "generate_report"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry_policy: RetryPolicy,
    pub poll_interval: Duration,
    pub unknown_kind: UnknownKindPolicy,
    pub execution_timeout: Option<Duration>,
    pub failed_jobs_log: PathBuf,
    pub allowed_kinds: Vec<JobKind>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub queue_key: String,
    pub bind_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            poll_interval: Duration::from_millis(2000),
            unknown_kind: UnknownKindPolicy::default(),
            execution_timeout: None,
            failed_jobs_log: PathBuf::from("failed_jobs.log"),
            allowed_kinds: DEFAULT_ALLOWED_KINDS
                .iter()
                .filter_map(|k| JobKind::new(*k).ok())
                .collect(),
            database_url: None,
            redis_url: None,
            queue_key: "job_queue".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let bound = get("TASKQ_MAX_RETRIES")
            .map(|v| parse::<u32>("TASKQ_MAX_RETRIES", &v))
            .transpose()?;
        config.retry_policy = match (bound, get("TASKQ_BACKOFF_SECS")) {
            (bound, Some(raw)) => {
                let table = parse_backoff_table(&raw)?;
                if let Some(bound) = bound {
                    if bound as usize != table.len() {
                        return Err(ConfigError::invalid(
                            "TASKQ_BACKOFF_SECS",
                            &raw,
                            format!("expected {bound} entries to match TASKQ_MAX_RETRIES"),
                        ));
                    }
                }
                RetryPolicy::from_table(table)
                    .map_err(|e| ConfigError::invalid("TASKQ_BACKOFF_SECS", &raw, e))?
            }
            (Some(bound), None) => RetryPolicy::quadratic(bound, Duration::from_secs(1)),
            (None, None) => RetryPolicy::default(),
        };

        if let Some(v) = get("TASKQ_POLL_INTERVAL_MS") {
            let ms = parse::<u64>("TASKQ_POLL_INTERVAL_MS", &v)?;
            if ms == 0 {
                return Err(ConfigError::invalid("TASKQ_POLL_INTERVAL_MS", &v, "must be positive"));
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = get("TASKQ_UNKNOWN_KIND") {
            config.unknown_kind = parse("TASKQ_UNKNOWN_KIND", &v)?;
        }
        if let Some(v) = get("TASKQ_EXECUTION_TIMEOUT_MS") {
            let ms = parse::<u64>("TASKQ_EXECUTION_TIMEOUT_MS", &v)?;
            if ms == 0 {
                return Err(ConfigError::invalid("TASKQ_EXECUTION_TIMEOUT_MS", &v, "must be positive"));
            }
            config.execution_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(v) = get("TASKQ_FAILED_JOBS_LOG") {
            config.failed_jobs_log = PathBuf::from(v);
        }
        if let Some(v) = get("TASKQ_ALLOWED_KINDS") {
            config.allowed_kinds = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| JobKind::new(k).map_err(|e| ConfigError::invalid("TASKQ_ALLOWED_KINDS", &v, e)))
                .collect::<Result<_, _>>()?;
        }
        config.database_url = get("DATABASE_URL");
        config.redis_url = get("REDIS_URL");
        if let Some(v) = get("TASKQ_QUEUE_KEY") {
            config.queue_key = v;
        }
        if let Some(v) = get("TASKQ_BIND_ADDR") {
            config.bind_addr = parse("TASKQ_BIND_ADDR", &v)?;
        }

        Ok(config)
    }

    pub fn worker_config(&self, name: impl Into<String>) -> WorkerConfig {
        WorkerConfig {
            name: name.into(),
            poll_interval: self.poll_interval,
            retry_policy: self.retry_policy.clone(),
            unknown_kind: self.unknown_kind,
        }
    }

    pub fn is_allowed_kind(&self, kind: &JobKind) -> bool {
        self.allowed_kinds.contains(kind)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(var, value, e))
}

fn parse_backoff_table(raw: &str) -> Result<Vec<Duration>, ConfigError> {
    raw.split(',')
        .map(|entry| parse::<u64>("TASKQ_BACKOFF_SECS", entry).map(Duration::from_secs))
        .collect()
}
