//! Unified error type hierarchy for the SUSFS patcher
//!
//! Provides structured error handling with PatchError, ConfigError and
//! VerificationError.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Anchor matching and patch application errors.
///
/// `AnchorNotFound`, `AmbiguousAnchor` and `TargetFileMissing` are recorded
/// per operation by the runner; only `Io` aborts a run.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("No anchor candidate matched in {file} for '{operation}'")]
    AnchorNotFound { operation: String, file: String },

    #[error("Anchor tier {candidate} is ambiguous: '{needle}' occurs {count} times")]
    AmbiguousAnchor {
        candidate: usize,
        needle: String,
        count: usize,
    },

    #[error("Patch target file not found: {0}")]
    TargetFileMissing(String),

    #[error("Invalid regex pattern: {0}")]
    RegexInvalid(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PatchError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid pattern in config: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Verification pass errors.
#[derive(Error, Debug)]
pub enum VerificationError {
    /// The tree is not in the required end state.
    #[error("Verification failed: {failed} required check(s) did not pass")]
    Mismatch { failed: usize },

    #[error("Invalid verification pattern: {0}")]
    RegexInvalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_anchor_display() {
        let err = PatchError::AmbiguousAnchor {
            candidate: 1,
            needle: "restore_nameidata();".to_string(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Anchor tier 1 is ambiguous: 'restore_nameidata();' occurs 2 times"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileNotFound("/etc/susfs.json".to_string());
        assert_eq!(err.to_string(), "Configuration file not found: /etc/susfs.json");
    }

    #[test]
    fn test_mismatch_display() {
        let err = VerificationError::Mismatch { failed: 3 };
        assert_eq!(
            err.to_string(),
            "Verification failed: 3 required check(s) did not pass"
        );
    }
}
