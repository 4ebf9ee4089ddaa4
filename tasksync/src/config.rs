//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! database_url = "sqlite://tasksync.db?mode=rwc"
//! remote_url = "http://localhost:8080/"
//! owner = "alice"
//! reconcile_interval_secs = 60
//! request_timeout_secs = 5
//! probe_interval_secs = 10
//! sync_on_reconnect = true
//! ```
//!
//! Every key is optional except `owner`, which must end up non-empty after
//! any command-line overrides have been applied.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub database_url: String,
    /// Root of the remote API; the task endpoints live under `to-do/task/`.
    pub remote_url: String,
    pub owner: String,
    pub reconcile_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub probe_interval_secs: u64,
    pub sync_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tasksync.db?mode=rwc".to_string(),
            remote_url: "http://localhost:8080/".to_string(),
            owner: String::new(),
            reconcile_interval_secs: 60,
            request_timeout_secs: 5,
            probe_interval_secs: 10,
            sync_on_reconnect: true,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse `path`. Does not validate; call [`validate`](Self::validate)
    /// once overrides are applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.trim().is_empty() {
            return Err(invalid("owner", "must not be empty"));
        }
        if self.database_url.is_empty() {
            return Err(invalid("database_url", "must not be empty"));
        }
        self.remote_url()?;
        for (field, value) in [
            ("reconcile_interval_secs", self.reconcile_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("probe_interval_secs", self.probe_interval_secs),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn remote_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.remote_url).map_err(|e| invalid("remote_url", e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid("remote_url", format!("unsupported scheme `{other}`"))),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.sync_on_reconnect);
    }

    #[test]
    fn test_partial_file_overrides() {
        let config = SyncConfig::from_toml_str(
            r#"
            owner = "alice"
            remote_url = "https://tasks.example.com/api/"
            reconcile_interval_secs = 15
            "#,
        )
        .unwrap();
        assert_eq!(config.owner, "alice");
        assert_eq!(config.reconcile_interval_secs, 15);
        assert_eq!(config.probe_interval_secs, 10);
        config.validate().unwrap();
        assert_eq!(config.remote_url().unwrap().host_str(), Some("tasks.example.com"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = SyncConfig::from_toml_str("ownr = \"alice\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let missing_owner = SyncConfig::default();
        assert!(matches!(
            missing_owner.validate(),
            Err(ConfigError::Invalid { field: "owner", .. })
        ));

        let zero_interval = SyncConfig {
            owner: "alice".into(),
            reconcile_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_interval.validate(),
            Err(ConfigError::Invalid { field: "reconcile_interval_secs", .. })
        ));

        let bad_scheme = SyncConfig {
            owner: "alice".into(),
            remote_url: "ftp://example.com/".into(),
            ..Default::default()
        };
        assert!(matches!(
            bad_scheme.validate(),
            Err(ConfigError::Invalid { field: "remote_url", .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfig::load(Path::new("/nonexistent/tasksync.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
