/// Configuration for the translation pipeline
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitOptions {
    /// Ceiling for an uploaded job file, checked before parsing.
    pub max_payload_bytes: usize,
    /// Ceiling for a single item, in UTF-8 bytes.
    pub max_item_bytes: usize,
}

impl Default for LimitOptions {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            max_item_bytes: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchOptions {
    /// Fan-out limit for concurrent backend calls within one job.
    pub concurrency: usize,
    /// Total backend calls per item, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound applied to server provided retry hints.
    pub max_hint_delay_ms: u64,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            max_hint_delay_ms: 60_000,
        }
    }
}

impl DispatchOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts.saturating_sub(1),
        )
        .with_hint_window(Duration::from_millis(self.max_hint_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerOptions {
    pub execution_budget_secs: u64,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            execution_budget_secs: 60,
        }
    }
}

impl TriggerOptions {
    pub fn execution_budget(&self) -> Duration {
        Duration::from_secs(self.execution_budget_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileOptions {
    pub poll_interval_secs: u64,
    pub poll_window_secs: u64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            poll_window_secs: 120,
        }
    }
}

impl ReconcileOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_secs(self.poll_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    pub jobs_prefix: String,
    pub responses_prefix: String,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            jobs_prefix: "jobs/".into(),
            responses_prefix: "responses/".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineOptions {
    /// How long the caller waits on the synchronous path.
    pub sync_timeout_secs: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            sync_timeout_secs: 30,
        }
    }
}

impl PipelineOptions {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub limits: LimitOptions,
    pub dispatch: DispatchOptions,
    pub trigger: TriggerOptions,
    pub reconcile: ReconcileOptions,
    pub storage: StorageOptions,
    pub pipeline: PipelineOptions,
}

impl TranslatorConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.concurrency == 0 {
            return Err(ConfigError::Invalid("dispatch.concurrency must be > 0".into()));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(ConfigError::Invalid("dispatch.maxAttempts must be > 0".into()));
        }
        if self.reconcile.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.pollIntervalSecs must be > 0".into(),
            ));
        }
        if self.limits.max_payload_bytes == 0 || self.limits.max_item_bytes == 0 {
            return Err(ConfigError::Invalid("limits must be > 0".into()));
        }

        let jobs = self.storage.jobs_prefix.trim();
        let responses = self.storage.responses_prefix.trim();
        if jobs.is_empty() || responses.is_empty() {
            return Err(ConfigError::Invalid("storage prefixes must not be empty".into()));
        }
        if jobs.starts_with(responses) || responses.starts_with(jobs) {
            return Err(ConfigError::Invalid(
                "jobs and responses prefixes must not overlap".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = TranslatorConfig::default();
        assert_eq!(config.dispatch.concurrency, 5);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.limits.max_payload_bytes, 1_048_576);
        assert_eq!(config.reconcile.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.reconcile.poll_window(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_serialization() {
        let config = TranslatorConfig::default();
        let json = config.to_json().unwrap();
        assert!(json.contains("maxAttempts"));
        let deserialized = TranslatorConfig::from_json(&json).unwrap();

        assert_eq!(config.dispatch.concurrency, deserialized.dispatch.concurrency);
        assert_eq!(config.storage.jobs_prefix, deserialized.storage.jobs_prefix);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = TranslatorConfig::from_json(r#"{"dispatch":{"concurrency":2}}"#).unwrap();
        assert_eq!(config.dispatch.concurrency, 2);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.trigger.execution_budget_secs, 60);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("translator.yaml");
        let mut config = TranslatorConfig::default();
        config.reconcile.poll_window_secs = 30;
        config.to_yaml_file(&path).unwrap();

        let loaded = TranslatorConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.reconcile.poll_window_secs, 30);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let zero_fanout = TranslatorConfig::from_json(r#"{"dispatch":{"concurrency":0}}"#);
        assert!(matches!(zero_fanout, Err(ConfigError::Invalid(_))));

        let overlapping = TranslatorConfig::from_json(
            r#"{"storage":{"jobsPrefix":"data/","responsesPrefix":"data/out/"}}"#,
        );
        assert!(matches!(overlapping, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_retry_policy_from_dispatch() {
        let policy = DispatchOptions::default().retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
