use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::*;
use crate::notify::RetryPolicy;

/// Runtime settings. Every field has a default; `from_env` overrides them
/// from `ROOMBOOK_*` variables and ignores values that do not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub notify_capacity: usize,
    pub notify_max_attempts: u32,
    /// Prometheus exporter port; `None` disables the exporter.
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            compact_interval: Duration::from_secs(DEFAULT_COMPACT_INTERVAL_SECS),
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
            notify_max_attempts: DEFAULT_NOTIFY_MAX_ATTEMPTS,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        fn num<T: FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            data_dir: var("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: num(var("ROOMBOOK_COMPACT_THRESHOLD"))
                .unwrap_or(defaults.compact_threshold),
            compact_interval: num(var("ROOMBOOK_COMPACT_INTERVAL_SECS"))
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            notify_capacity: num(var("ROOMBOOK_NOTIFY_CAPACITY"))
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.notify_capacity),
            notify_max_attempts: num(var("ROOMBOOK_NOTIFY_MAX_ATTEMPTS"))
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.notify_max_attempts),
            metrics_port: num(var("ROOMBOOK_METRICS_PORT")),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.notify_max_attempts,
            ..RetryPolicy::default()
        }
    }
}
