use sea_orm::DbErr;
use thiserror::Error;

/// Errors produced by the stores and the reconciler.
///
/// `Offline` and `Remote` come from the remote path and are always
/// recoverable: the next trigger (edit, periodic pass) retries. `Storage` and
/// `NotFound` come from the local replica and are surfaced to the caller of
/// the user action that triggered them.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote store is unreachable while offline")]
    Offline,

    #[error("remote request failed ({}): {message}", describe_status(.status))]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("local storage failure: {0}")]
    Storage(#[from] DbErr),

    #[error("task {0} not found in the local store")]
    NotFound(String),
}

impl SyncError {
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::Remote {
            status,
            message: message.into(),
        }
    }

    /// `true` for failures that only concern the remote path.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Offline | SyncError::Remote { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            err.to_string()
        };
        SyncError::Remote {
            status: err.status().map(|s| s.as_u16()),
            message,
        }
    }
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no status".to_string(),
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while loading a [`SyncConfig`](crate::config::SyncConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_with_status() {
        let err = SyncError::remote(Some(500), "internal error");
        assert_eq!(err.to_string(), "remote request failed (HTTP 500): internal error");
    }

    #[test]
    fn test_remote_error_display_without_status() {
        let err = SyncError::remote(None, "connection refused");
        assert_eq!(err.to_string(), "remote request failed (no status): connection refused");
    }

    #[test]
    fn test_is_remote() {
        assert!(SyncError::Offline.is_remote());
        assert!(SyncError::remote(Some(404), "gone").is_remote());
        assert!(!SyncError::NotFound("a".into()).is_remote());
        assert!(!SyncError::Storage(DbErr::Custom("boom".into())).is_remote());
    }
}
