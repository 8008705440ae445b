//! Centralized error types for mailfetch.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// All errors produced by the mailfetch library.
#[derive(Error, Debug)]
pub enum FetchError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The byte stream could not be parsed as a message at all.
    #[error("Cannot decode message: {0}")]
    Decode(String),

    /// The advisory state lock was not acquired in time.
    #[error("Timed out after {waited:?} waiting for state lock '{path}'")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The state file exists but is not a usable state document.
    #[error("Invalid state file '{path}': {reason}")]
    InvalidState { path: PathBuf, reason: String },

    /// The requested window has its bounds reversed.
    #[error("Invalid window: since {since} is after until {until}")]
    InvalidWindow {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },

    /// The upstream message source failed.
    #[error("Upstream message source error: {0}")]
    Upstream(String),
}

/// Convenience alias for `Result<T, FetchError>`.
pub type Result<T> = std::result::Result<T, FetchError>;

impl FetchError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for failures of the durable seen-set (lock, I/O, bad document).
    pub fn is_store(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::LockTimeout { .. } | Self::InvalidState { .. }
        )
    }

    /// `true` when the message source, not this crate, failed.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}
