//! KPN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, KeepnError>;

/// Top-level error type for keepn.
#[derive(Debug, Error)]
pub enum KeepnError {
    #[error("[KPN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[KPN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[KPN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[KPN-1004] invalid file pattern {pattern:?}: {details}")]
    InvalidPattern { pattern: String, details: String },

    #[error("[KPN-1005] invalid duration {raw:?}: {details}")]
    InvalidDuration { raw: String, details: String },

    #[error("[KPN-2001] cannot watch {path}: {details}")]
    WatchRegistration { path: PathBuf, details: String },

    #[error("[KPN-2002] watch source failure: {details}")]
    WatchSource { details: String },

    #[error("[KPN-2003] watch source already running")]
    AlreadyRunning,

    #[error("[KPN-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[KPN-3001] cannot list directory {path}: {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[KPN-3002] cannot remove {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[KPN-3003] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[KPN-3004] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[KPN-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl KeepnError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "KPN-1001",
            Self::MissingConfig { .. } => "KPN-1002",
            Self::ConfigParse { .. } => "KPN-1003",
            Self::InvalidPattern { .. } => "KPN-1004",
            Self::InvalidDuration { .. } => "KPN-1005",
            Self::WatchRegistration { .. } => "KPN-2001",
            Self::WatchSource { .. } => "KPN-2002",
            Self::AlreadyRunning => "KPN-2003",
            Self::Serialization { .. } => "KPN-2101",
            Self::ListDirectory { .. } => "KPN-3001",
            Self::RemoveFile { .. } => "KPN-3002",
            Self::Io { .. } => "KPN-3003",
            Self::ChannelClosed { .. } => "KPN-3004",
            Self::Runtime { .. } => "KPN-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Listing and removal failures usually come from a concurrent writer or a
    /// transient permission change, so the next event may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ListDirectory { .. }
                | Self::RemoveFile { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error belongs to the startup configuration class.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidPattern { .. }
                | Self::InvalidDuration { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for KeepnError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for KeepnError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<KeepnError> {
        vec![
            KeepnError::InvalidConfig {
                details: String::new(),
            },
            KeepnError::MissingConfig {
                path: PathBuf::new(),
            },
            KeepnError::ConfigParse {
                context: "",
                details: String::new(),
            },
            KeepnError::InvalidPattern {
                pattern: String::new(),
                details: String::new(),
            },
            KeepnError::InvalidDuration {
                raw: String::new(),
                details: String::new(),
            },
            KeepnError::WatchRegistration {
                path: PathBuf::new(),
                details: String::new(),
            },
            KeepnError::WatchSource {
                details: String::new(),
            },
            KeepnError::AlreadyRunning,
            KeepnError::Serialization {
                context: "",
                details: String::new(),
            },
            KeepnError::ListDirectory {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            KeepnError::RemoveFile {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            KeepnError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            KeepnError::ChannelClosed { component: "" },
            KeepnError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = every_variant();
        let codes: Vec<&str> = errors.iter().map(KeepnError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_starts_with_code() {
        for err in every_variant() {
            let msg = err.to_string();
            assert!(
                msg.starts_with(&format!("[{}]", err.code())),
                "display should lead with its code: {msg}"
            );
        }
    }

    #[test]
    fn config_class_is_not_retryable() {
        for err in every_variant() {
            if err.is_config() {
                assert!(!err.is_retryable(), "{} must not be retryable", err.code());
            }
        }
    }

    #[test]
    fn pruning_failures_are_retryable() {
        assert!(
            KeepnError::ListDirectory {
                path: PathBuf::from("/var/log/app"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }
            .is_retryable()
        );
        assert!(
            KeepnError::RemoveFile {
                path: PathBuf::from("/var/log/app/a.log"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
            .is_retryable()
        );
        assert!(
            !KeepnError::WatchSource {
                details: "backend died".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = KeepnError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "KPN-3003");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: KeepnError = json_err.into();
        assert_eq!(err.code(), "KPN-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: KeepnError = toml_err.into();
        assert_eq!(err.code(), "KPN-1003");
    }
}
