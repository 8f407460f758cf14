//! Configuration Management
//!
//! Handles persistent configuration storage for cloudmap.

use crate::call::{Backoff, RetryPolicy};
use crate::error::Result;
use crate::remote::ErrorClassifier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "http://localhost:8080/";

/// Retry settings as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub deadline_secs: u64,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            deadline_secs: 300,
            delay_ms: 1000,
            max_delay_ms: 30_000,
            exponential: true,
        }
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// API endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region sent with every call
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Page size override for list calls
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Extra error-code/message patterns meaning "not found"
    #[serde(default)]
    pub not_found_patterns: Vec<String>,
    /// Extra error-code/message patterns meaning "retry later"
    #[serde(default)]
    pub transient_patterns: Vec<String>,
}

/// Region names are lowercase alphanumerics and hyphens
fn validate_region(region: &str) -> bool {
    !region.is_empty()
        && region.len() <= 64
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudmap").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from a specific file; missing or unreadable files yield defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective endpoint (CLI > config > CLOUDMAP_ENDPOINT > default)
    pub fn effective_endpoint(&self, cli: Option<&str>) -> String {
        cli.map(str::to_string)
            .or_else(|| self.endpoint.clone())
            .or_else(|| std::env::var("CLOUDMAP_ENDPOINT").ok())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Get effective region (CLI > config > CLOUDMAP_REGION)
    pub fn effective_region(&self, cli: Option<&str>) -> Option<String> {
        if let Some(region) = cli.map(str::to_string).or_else(|| self.region.clone()) {
            return Some(region);
        }
        let region = std::env::var("CLOUDMAP_REGION").ok()?;
        if validate_region(&region) {
            Some(region)
        } else {
            tracing::warn!("Invalid region format in CLOUDMAP_REGION");
            None
        }
    }

    /// Retry policy built from the stored settings
    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.retry;
        let delay = Duration::from_millis(r.delay_ms);
        RetryPolicy {
            max_attempts: r.max_attempts.max(1),
            deadline: Duration::from_secs(r.deadline_secs),
            backoff: if r.exponential {
                Backoff::Exponential {
                    base: delay,
                    max: Duration::from_millis(r.max_delay_ms.max(r.delay_ms)),
                }
            } else {
                Backoff::Fixed(delay)
            },
        }
    }

    /// Default classifier plus the configured extra patterns
    pub fn classifier(&self) -> ErrorClassifier {
        let classifier = self
            .not_found_patterns
            .iter()
            .fold(ErrorClassifier::default(), |c, p| c.with_not_found_pattern(p));
        self.transient_patterns
            .iter()
            .fold(classifier, |c, p| c.with_transient_pattern(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ErrorClass, RemoteError};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cloudmap-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from(&temp_path("config.json"));
        assert!(config.endpoint.is_none());
        assert_eq!(config.retry, RetrySettings::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path("config.json");
        let config = Config {
            endpoint: Some("https://api.example.com/".to_string()),
            region: Some("eu-west-1".to_string()),
            page_size: Some(20),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.endpoint.as_deref(), Some("https://api.example.com/"));
        assert_eq!(loaded.region.as_deref(), Some("eu-west-1"));
        assert_eq!(loaded.page_size, Some(20));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"retry": {"max_attempts": 2}}"#).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.deadline_secs, 300);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config {
            endpoint: Some("https://from-config/".to_string()),
            region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        assert_eq!(config.effective_endpoint(Some("https://from-cli/")), "https://from-cli/");
        assert_eq!(config.effective_endpoint(None), "https://from-config/");
        assert_eq!(config.effective_region(Some("ap-south-1")).as_deref(), Some("ap-south-1"));
        assert_eq!(config.effective_region(None).as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let mut config = Config::default();
        config.retry.exponential = false;
        config.retry.delay_ms = 250;
        let policy = config.retry_policy();
        assert_eq!(policy.backoff, Backoff::Fixed(Duration::from_millis(250)));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.deadline, Duration::from_secs(300));
    }

    #[test]
    fn test_classifier_extra_patterns() {
        let config = Config {
            not_found_patterns: vec!["NoSuchEntity".to_string()],
            transient_patterns: vec!["QuotaPending".to_string()],
            ..Default::default()
        };
        let classifier = config.classifier();
        assert_eq!(
            classifier.classify(&RemoteError::new("x").with_code("NoSuchEntity")),
            ErrorClass::NotFound
        );
        assert_eq!(
            classifier.classify(&RemoteError::new("x").with_code("QuotaPending")),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_validate_region() {
        assert!(validate_region("eu-west-1"));
        assert!(!validate_region("EU West"));
        assert!(!validate_region(""));
    }
}
