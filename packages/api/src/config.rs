//! Environment-driven configuration for the pipeline.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use actors::ProcessConfig;
use job_core::{ConfigError, FullPolicy, QueueConfig, WorkerConfig};

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Everything the composition root needs to build the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Number of workers sharing the queue.
    pub workers: usize,
    pub queue: QueueConfig,
    pub process: ProcessConfig,
    pub worker: WorkerConfig,
    /// Print every event as a JSON line.
    pub json_events: bool,
    pub event_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue: QueueConfig::unbounded(),
            process: ProcessConfig::default(),
            worker: WorkerConfig::default(),
            json_events: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Read configuration from `TRANSCODE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let defaults = Self::default();

        let workers = match parse_num::<usize>(&get, "TRANSCODE_WORKERS")? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    "TRANSCODE_WORKERS",
                    "must be at least 1",
                ));
            }
            Some(n) => n,
            None => defaults.workers,
        };

        let full_policy = match get("TRANSCODE_QUEUE_FULL_POLICY") {
            Some(v) => {
                FullPolicy::from_str(&v).map_err(|e| rekey(e, "TRANSCODE_QUEUE_FULL_POLICY"))?
            }
            None => FullPolicy::default(),
        };
        let queue = QueueConfig {
            capacity: parse_num::<usize>(&get, "TRANSCODE_QUEUE_CAPACITY")?,
            full_policy,
        };
        queue
            .validate()
            .map_err(|e| rekey(e, "TRANSCODE_QUEUE_CAPACITY"))?;

        let mut process = defaults.process;
        if let Some(program) = get("TRANSCODE_PROGRAM") {
            process.program = PathBuf::from(program);
        }
        if let Some(args) = get("TRANSCODE_ARGS") {
            process.args = args.split_whitespace().map(String::from).collect();
        }
        process.timeout = match parse_num::<u64>(&get, "TRANSCODE_TIMEOUT_SECS")? {
            Some(0) => {
                return Err(ConfigError::invalid(
                    "TRANSCODE_TIMEOUT_SECS",
                    "must be greater than 0",
                ));
            }
            secs => secs.map(Duration::from_secs),
        };
        if let Some(create) = parse_bool(&get, "TRANSCODE_CREATE_TARGET_DIR")? {
            process.create_target_dir = create;
        }

        let mut worker = defaults.worker;
        if let Some(retries) = parse_num::<u32>(&get, "TRANSCODE_MAX_RETRIES")? {
            worker.max_retries = retries;
        }
        if let Some(ms) = parse_num::<u64>(&get, "TRANSCODE_RETRY_BACKOFF_MS")? {
            worker.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_num::<u32>(&get, "TRANSCODE_MAX_CONSECUTIVE_FAULTS")? {
            worker.max_consecutive_faults = (limit > 0).then_some(limit);
        }

        let json_events = parse_bool(&get, "TRANSCODE_JSON_EVENTS")?.unwrap_or(false);

        Ok(Self {
            workers,
            queue,
            process,
            worker,
            json_events,
            event_capacity: defaults.event_capacity,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_process(mut self, process: ProcessConfig) -> Self {
        self.process = process;
        self
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Report a value-level error against the variable it came from.
fn rekey(err: ConfigError, key: &str) -> ConfigError {
    let ConfigError::Invalid { reason, .. } = err;
    ConfigError::invalid(key, reason)
}

fn parse_num<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| ConfigError::invalid(key, format!("{v:?}: {e}")))
        })
        .transpose()
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = get(key) else {
        return Ok(None);
    };

    let normalized = v.to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(ConfigError::invalid(
                key,
                format!("{v:?} is not a boolean (expected true|false)"),
            ));
        }
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue.capacity, None);
        assert_eq!(config.process.program, PathBuf::from("ffmpeg"));
        assert!(config.process.create_target_dir);
        assert_eq!(config.worker.max_consecutive_faults, Some(5));
    }

    #[test]
    fn reads_every_variable() {
        let config = from_pairs(&[
            ("TRANSCODE_WORKERS", "4"),
            ("TRANSCODE_QUEUE_CAPACITY", "16"),
            ("TRANSCODE_QUEUE_FULL_POLICY", "reject"),
            ("TRANSCODE_PROGRAM", "/opt/bin/ffmpeg"),
            ("TRANSCODE_ARGS", "-i {source}  -c:v libx264 {target}"),
            ("TRANSCODE_TIMEOUT_SECS", "30"),
            ("TRANSCODE_CREATE_TARGET_DIR", "no"),
            ("TRANSCODE_MAX_RETRIES", "2"),
            ("TRANSCODE_RETRY_BACKOFF_MS", "250"),
            ("TRANSCODE_MAX_CONSECUTIVE_FAULTS", "0"),
            ("TRANSCODE_JSON_EVENTS", "YES"),
        ])
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.queue, QueueConfig::bounded(16, FullPolicy::Reject));
        assert_eq!(config.process.program, PathBuf::from("/opt/bin/ffmpeg"));
        assert_eq!(
            config.process.args,
            vec!["-i", "{source}", "-c:v", "libx264", "{target}"]
        );
        assert_eq!(config.process.timeout, Some(Duration::from_secs(30)));
        assert!(!config.process.create_target_dir);
        assert_eq!(config.worker.max_retries, 2);
        assert_eq!(config.worker.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.worker.max_consecutive_faults, None);
        assert!(config.json_events);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = from_pairs(&[("TRANSCODE_WORKERS", "  "), ("TRANSCODE_PROGRAM", "")]).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.process.program, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let cases = [
            ("TRANSCODE_WORKERS", "0"),
            ("TRANSCODE_WORKERS", "many"),
            ("TRANSCODE_QUEUE_CAPACITY", "0"),
            ("TRANSCODE_QUEUE_FULL_POLICY", "drop"),
            ("TRANSCODE_TIMEOUT_SECS", "-1"),
            ("TRANSCODE_CREATE_TARGET_DIR", "maybe"),
        ];
        for (key, value) in cases {
            let err = from_pairs(&[(key, value)]).unwrap_err();
            let ConfigError::Invalid { key: reported, .. } = &err;
            assert_eq!(reported, key, "{key}={value} reported {err}");
        }
    }
}
