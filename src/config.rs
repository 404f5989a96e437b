// Tue Jan 13 2026 - Alex

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub thread_name_prefix: String,
    pub enable_metrics: bool,
    /// Maximum number of queued tasks; 0 disables the limit.
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub dispatch_wait_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub retention_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            thread_name_prefix: "task-engine".to_string(),
            enable_metrics: true,
            queue_capacity: 1000,
            poll_interval_ms: 100,
            dispatch_wait_ms: 1000,
            shutdown_timeout_secs: 30,
            retention_secs: 3600,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_dispatch_wait(mut self, wait: Duration) -> Self {
        self.dispatch_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_secs = retention.as_secs();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dispatch_wait(&self) -> Duration {
        Duration::from_millis(self.dispatch_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Validation("worker_count must be greater than 0".to_string()));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Validation("thread_name_prefix must not be empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation("poll_interval_ms must be greater than 0".to_string()));
        }
        if self.dispatch_wait_ms == 0 {
            return Err(ConfigError::Validation("dispatch_wait_ms must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !ext.eq_ignore_ascii_case("json") {
            return Err(ConfigError::UnsupportedFormat(ext.to_string()));
        }

        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        if !ext.eq_ignore_ascii_case("json") {
            return Err(ConfigError::UnsupportedFormat(ext.to_string()));
        }

        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring config {}: {}", path.as_ref().display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("task-engine-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.worker_count > 0);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.dispatch_wait(), Duration::from_secs(1));
        assert_eq!(config.queue_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig::new().with_worker_count(0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let config = EngineConfig::new().with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip.json");
        let config = EngineConfig::new()
            .with_worker_count(3)
            .with_thread_name_prefix("import")
            .with_queue_capacity(0)
            .with_shutdown_timeout(Duration::from_secs(5));

        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_path("partial.json");
        fs::write(&path, r#"{ "worker_count": 2, "enable_metrics": false }"#).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.worker_count, 2);
        assert!(!loaded.enable_metrics);
        assert_eq!(loaded.poll_interval_ms, 100);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            EngineConfig::load(temp_path("missing.json")),
            Err(ConfigError::NotFound(_))
        ));

        let path = temp_path("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let result = EngineConfig::load(&path);
        let fallback = EngineConfig::load_or_default(&path);
        fs::remove_file(&path).ok();

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        assert_eq!(fallback, EngineConfig::default());
        assert!(matches!(
            EngineConfig::new().save(temp_path("config.toml")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
