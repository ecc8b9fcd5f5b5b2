#![forbid(unsafe_code)]

//! Error types shared by the lock, capture and settings layers.

use std::time::Duration;

use thiserror::Error;

use crate::capture::ContextId;
use crate::lock::LockMode;

/// Failures raised while acquiring or upgrading a lock token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock (or the collection owning it) has been disposed.
    #[error("lock has been disposed")]
    Disposed,

    /// The lock could not be taken within the configured timeout.
    #[error("timed out after {timeout:?} acquiring {mode} lock")]
    Timeout { mode: LockMode, timeout: Duration },

    /// The calling thread already holds this lock.
    #[error("re-entrant {mode} acquisition of a lock already held by this thread")]
    Recursive { mode: LockMode },
}

/// Violations of the capture contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The item at `index` belongs to another undo context.
    #[error("item {index} is already captured by context {owner}")]
    AlreadyCaptured { index: usize, owner: ContextId },

    /// The item at `index` is not captured at all.
    #[error("item {index} is not captured")]
    NotCaptured { index: usize },

    /// The item at `index` is captured, but not by the expected parent.
    #[error("item {index} is captured by context {owner}, expected {expected}")]
    CapturedByOther {
        index: usize,
        owner: ContextId,
        expected: ContextId,
    },
}

/// Errors produced while loading [`crate::settings::EnvironmentSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[cfg(feature = "config")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings: {}", .0.join("; "))]
    Validation(Vec<String>),
}
