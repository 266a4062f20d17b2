//! ENCG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Top-level error type for the encoding guardian.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("[ENCG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ENCG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ENCG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ENCG-2001] invalid UTF-8 in {path}: {reason}")]
    Validation { path: PathBuf, reason: String },

    #[error("[ENCG-2101] quarantine of {path} failed: {source}")]
    Quarantine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ENCG-2201] repair of {path} failed: {source}")]
    Repair {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ENCG-2301] scan cycle {cycle} failed: {details}")]
    ScanCycle { cycle: u64, details: String },

    #[error("[ENCG-2401] version control query failed: {details}")]
    VersionControl { details: String },

    #[error("[ENCG-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ENCG-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ENCG-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl GuardError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ENCG-1001",
            Self::MissingConfig { .. } => "ENCG-1002",
            Self::ConfigParse { .. } => "ENCG-1003",
            Self::Validation { .. } => "ENCG-2001",
            Self::Quarantine { .. } => "ENCG-2101",
            Self::Repair { .. } => "ENCG-2201",
            Self::ScanCycle { .. } => "ENCG-2301",
            Self::VersionControl { .. } => "ENCG-2401",
            Self::Serialization { .. } => "ENCG-3001",
            Self::Io { .. } => "ENCG-3002",
            Self::Runtime { .. } => "ENCG-3900",
        }
    }

    /// Whether the error must stop the process before the guardian loop starts.
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. }
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

impl From<serde_json::Error> for GuardError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for GuardError {
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

    fn io_err() -> std::io::Error {
        std::io::Error::other("test")
    }

    fn all_variants() -> Vec<GuardError> {
        vec![
            GuardError::InvalidConfig {
                details: String::new(),
            },
            GuardError::MissingConfig {
                path: PathBuf::new(),
            },
            GuardError::ConfigParse {
                context: "",
                details: String::new(),
            },
            GuardError::Validation {
                path: PathBuf::new(),
                reason: String::new(),
            },
            GuardError::Quarantine {
                path: PathBuf::new(),
                source: io_err(),
            },
            GuardError::Repair {
                path: PathBuf::new(),
                source: io_err(),
            },
            GuardError::ScanCycle {
                cycle: 0,
                details: String::new(),
            },
            GuardError::VersionControl {
                details: String::new(),
            },
            GuardError::Serialization {
                context: "",
                details: String::new(),
            },
            GuardError::Io {
                path: PathBuf::new(),
                source: io_err(),
            },
            GuardError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(GuardError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_encg_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("ENCG-"),
                "code {} must start with ENCG-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = GuardError::InvalidConfig {
            details: "bad value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ENCG-1001"), "display should contain code: {msg}");
        assert!(msg.contains("bad value"), "display should contain details: {msg}");
    }

    #[test]
    fn only_config_errors_are_fatal_at_startup() {
        for err in all_variants() {
            let expected = matches!(
                err.code(),
                "ENCG-1001" | "ENCG-1002" | "ENCG-1003"
            );
            assert_eq!(err.is_fatal_at_startup(), expected, "{}", err.code());
        }
    }

    #[test]
    fn io_convenience_constructor() {
        let err = GuardError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "ENCG-3002");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: GuardError = json_err.into();
        assert_eq!(err.code(), "ENCG-3001");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: GuardError = toml_err.into();
        assert_eq!(err.code(), "ENCG-1003");
    }
}
