// Daemon configuration from environment variables

use anyhow::{Context, Result};
use jobpool_core::application::worker::{BackoffConfig, WorkerConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.jobpool/jobs.db";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub worker: WorkerConfig,
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("JOBPOOL_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = shellexpand::tilde(&db_path).into_owned();

        let mut worker = WorkerConfig::default();
        if let Some(concurrent) = parse_var(&lookup, "JOBPOOL_CONCURRENT")? {
            worker = worker.with_concurrent(concurrent);
        }
        if let Some(max_retries) = parse_var(&lookup, "JOBPOOL_MAX_RETRIES")? {
            worker = worker.with_max_retries(max_retries);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "JOBPOOL_POLL_INTERVAL_MS")? {
            worker = worker.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(base_delay_ms) = parse_var(&lookup, "JOBPOOL_BACKOFF_BASE_MS")? {
            worker = worker.with_backoff(BackoffConfig {
                base_delay_ms,
                ..BackoffConfig::default()
            });
        }
        worker.validate()?;

        let shutdown_timeout = parse_var::<u64, _>(&lookup, "JOBPOOL_SHUTDOWN_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        let log_format = match lookup("JOBPOOL_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        let log_dir = lookup("JOBPOOL_LOG_DIR")
            .filter(|dir| !dir.is_empty())
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned()));

        Ok(Self {
            db_path,
            worker,
            shutdown_timeout,
            log_format,
            log_dir,
        })
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: '{}'", name, raw))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<DaemonConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.db_path.ends_with(".jobpool/jobs.db"));
        assert!(!config.db_path.starts_with('~'));
        assert_eq!(config.worker.concurrent, 1);
        assert!(config.worker.backoff.is_none());
        assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("JOBPOOL_DB_PATH", "/tmp/jobs.db"),
            ("JOBPOOL_CONCURRENT", "8"),
            ("JOBPOOL_MAX_RETRIES", "5"),
            ("JOBPOOL_POLL_INTERVAL_MS", "50"),
            ("JOBPOOL_BACKOFF_BASE_MS", "200"),
            ("JOBPOOL_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.db_path, "/tmp/jobs.db");
        assert_eq!(config.worker.concurrent, 8);
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.worker.poll_interval, Duration::from_millis(50));
        assert_eq!(config.worker.backoff.unwrap().base_delay_ms, 200);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_bad_values() {
        tokio_test::assert_err!(config_from(&[("JOBPOOL_CONCURRENT", "many")]));
        tokio_test::assert_err!(config_from(&[("JOBPOOL_CONCURRENT", "0")]));
        tokio_test::assert_err!(config_from(&[("JOBPOOL_POLL_INTERVAL_MS", "-5")]));
    }
}
