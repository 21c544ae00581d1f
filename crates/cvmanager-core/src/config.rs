//! Provider configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Annotation holding a workload's rollback-after duration
pub const ROLLBACK_AFTER_ANNOTATION: &str = "cvmanager.io/rollback-after";

/// Options controlling how a Provider talks to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOptions {
    /// Retries of a rollout status update after a resource version conflict (default: 5)
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Wait between conflict retries (default: 100ms)
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Maximum number of per-kind list queries in flight during discovery.
    /// `1` queries kinds strictly one after another (default: 7)
    #[serde(default = "default_discovery_concurrency")]
    pub discovery_concurrency: usize,

    /// Annotation read for the rollback-after duration
    #[serde(default = "default_rollback_after_annotation")]
    pub rollback_after_annotation: String,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            conflict_retries: default_conflict_retries(),
            retry_backoff: default_retry_backoff(),
            discovery_concurrency: default_discovery_concurrency(),
            rollback_after_annotation: default_rollback_after_annotation(),
        }
    }
}

fn default_conflict_retries() -> u32 {
    5
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_discovery_concurrency() -> usize {
    7
}

fn default_rollback_after_annotation() -> String {
    ROLLBACK_AFTER_ANNOTATION.to_string()
}

impl ProviderOptions {
    /// Load options from a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Values below 1 are treated as 1
    pub fn discovery_concurrency(mut self, concurrency: usize) -> Self {
        self.discovery_concurrency = concurrency.max(1);
        self
    }

    pub fn rollback_after_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.rollback_after_annotation = annotation.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ProviderOptions::default();
        assert_eq!(opts.conflict_retries, 5);
        assert_eq!(opts.retry_backoff, Duration::from_millis(100));
        assert_eq!(opts.discovery_concurrency, 7);
        assert_eq!(opts.rollback_after_annotation, ROLLBACK_AFTER_ANNOTATION);
    }

    #[test]
    fn test_from_yaml_partial() {
        let opts = ProviderOptions::from_yaml_str(
            r#"
conflictRetries: 2
retryBackoff: 1s
"#,
        )
        .unwrap();

        assert_eq!(opts.conflict_retries, 2);
        assert_eq!(opts.retry_backoff, Duration::from_secs(1));
        assert_eq!(opts.discovery_concurrency, 7);
    }

    #[test]
    fn test_from_yaml_invalid() {
        assert!(ProviderOptions::from_yaml_str("retryBackoff: soon").is_err());
    }

    #[test]
    fn test_builder() {
        let opts = ProviderOptions::default()
            .conflict_retries(0)
            .discovery_concurrency(0)
            .rollback_after_annotation("example.com/rollback");

        assert_eq!(opts.conflict_retries, 0);
        assert_eq!(opts.discovery_concurrency, 1);
        assert_eq!(opts.rollback_after_annotation, "example.com/rollback");
    }
}
