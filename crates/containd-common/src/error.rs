//! Unified error types for the containd workspace.
//!
//! Host failures carry a [`HostErrorKind`] so the lifecycle core can tell
//! expected teardown races apart from genuine failures without string
//! matching.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::constants::{
    ERROR_BAD_PATHNAME, ERROR_BROKEN_PIPE, ERROR_PATH_NOT_FOUND, ERROR_SHUTDOWN_IN_PROGRESS,
};

/// Classification of a failure reported by the host compute service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    /// The pipe to the process was closed, usually because the
    /// environment was killed underneath the waiter.
    BrokenPipe,
    /// A shutdown of the environment is already under way.
    ShutdownInProgress,
    /// The environment no longer exists.
    PathNotFound,
    /// The environment path is malformed or already gone.
    BadPathname,
    /// The requested process is unknown to the host.
    NotFound,
    /// The host gave up before the operation completed.
    Timeout,
    /// Any other host status code.
    Other(u32),
}

impl HostErrorKind {
    /// Maps a raw host status code onto a kind.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            ERROR_BROKEN_PIPE => Self::BrokenPipe,
            ERROR_SHUTDOWN_IN_PROGRESS => Self::ShutdownInProgress,
            ERROR_BAD_PATHNAME => Self::BadPathname,
            ERROR_PATH_NOT_FOUND => Self::PathNotFound,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::ShutdownInProgress => write!(f, "shutdown in progress"),
            Self::PathNotFound => write!(f, "path not found"),
            Self::BadPathname => write!(f, "bad pathname"),
            Self::NotFound => write!(f, "not found"),
            Self::Timeout => write!(f, "timed out"),
            Self::Other(code) => write!(f, "status {code:#x}"),
        }
    }
}

/// A failure reported by the host compute service.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct HostError {
    /// Host operation that failed, e.g. `shutdown`.
    pub operation: &'static str,
    /// Classification of the failure.
    pub kind: HostErrorKind,
    /// Human-readable detail from the host.
    pub message: String,
}

impl HostError {
    /// Creates a host error for the given operation.
    #[must_use]
    pub fn new(operation: &'static str, kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    /// Whether the waiter lost its pipe because the environment went away.
    #[must_use]
    pub const fn is_broken_pipe(&self) -> bool {
        matches!(self.kind, HostErrorKind::BrokenPipe)
    }

    /// Whether a shutdown failure only means someone else is already
    /// tearing the environment down.
    #[must_use]
    pub const fn is_shutdown_race(&self) -> bool {
        matches!(
            self.kind,
            HostErrorKind::ShutdownInProgress
                | HostErrorKind::PathNotFound
                | HostErrorKind::BadPathname
        )
    }
}

/// Failure of a restart decision or of a pending restart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestartError {
    /// The restart manager was canceled by an explicit stop.
    #[error("restart canceled")]
    Canceled,
    /// A decision was requested while a restart is still pending.
    #[error("invalid call on active restart manager")]
    Active,
    /// The completion signal was dropped without a result.
    #[error("restart completion signal dropped")]
    Interrupted,
    /// No async runtime is available to drive the restart delay.
    #[error("no async runtime to schedule the restart")]
    NoRuntime,
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ContaindError {
    /// A host compute service call failed.
    #[error(transparent)]
    Host(#[from] HostError),

    /// A restart decision failed.
    #[error(transparent)]
    Restart(#[from] RestartError),

    /// The backend rejected a call.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// A container with the same friendly name is already live.
    #[error("container already exists: {name}")]
    AlreadyExists {
        /// Conflicting friendly name.
        name: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ContaindError>;
