//! Runtime configuration model.
//!
//! Timeouts are stored in milliseconds so the JSON form stays readable;
//! `null` means the host call may block indefinitely.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{ContaindError, Result};
use crate::types::Timeout;

/// Bounds applied to host shutdown and termination calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Graceful shutdown bound after the init process exits.
    pub shutdown_timeout_ms: Option<u64>,
    /// Forced termination bound when that shutdown fails.
    pub terminate_timeout_ms: Option<u64>,
    /// Shutdown bound for servicing containers.
    pub servicing_shutdown_timeout_ms: Option<u64>,
    /// Termination bound for servicing containers.
    pub servicing_terminate_timeout_ms: Option<u64>,
    /// Termination bound after a failed process creation.
    pub create_failure_terminate_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: Some(millis(constants::DEFAULT_SHUTDOWN_TIMEOUT)),
            terminate_timeout_ms: Some(millis(constants::DEFAULT_TERMINATE_TIMEOUT)),
            servicing_shutdown_timeout_ms: Some(millis(constants::SERVICING_SHUTDOWN_TIMEOUT)),
            servicing_terminate_timeout_ms: Some(millis(constants::SERVICING_TERMINATE_TIMEOUT)),
            create_failure_terminate_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields the defaults; fields absent from the file keep
    /// their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ContaindError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Graceful shutdown bound after the init process exits.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Timeout {
        to_timeout(self.shutdown_timeout_ms)
    }

    /// Forced termination bound when that shutdown fails.
    #[must_use]
    pub fn terminate_timeout(&self) -> Timeout {
        to_timeout(self.terminate_timeout_ms)
    }

    /// Shutdown bound for servicing containers.
    #[must_use]
    pub fn servicing_shutdown_timeout(&self) -> Timeout {
        to_timeout(self.servicing_shutdown_timeout_ms)
    }

    /// Termination bound for servicing containers.
    #[must_use]
    pub fn servicing_terminate_timeout(&self) -> Timeout {
        to_timeout(self.servicing_terminate_timeout_ms)
    }

    /// Termination bound after a failed process creation.
    #[must_use]
    pub fn create_failure_terminate_timeout(&self) -> Timeout {
        to_timeout(self.create_failure_terminate_timeout_ms)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn to_timeout(ms: Option<u64>) -> Timeout {
    Timeout::from(ms.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_bounds() {
        let cfg = RuntimeConfig::default();
        assert_eq!(
            cfg.shutdown_timeout(),
            Timeout::After(Duration::from_secs(300))
        );
        assert_eq!(
            cfg.terminate_timeout(),
            Timeout::After(Duration::from_secs(300))
        );
        assert_eq!(
            cfg.servicing_shutdown_timeout(),
            Timeout::After(Duration::from_secs(240))
        );
        assert_eq!(
            cfg.servicing_terminate_timeout(),
            Timeout::After(Duration::from_secs(60))
        );
        assert_eq!(cfg.create_failure_terminate_timeout(), Timeout::Infinite);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = RuntimeConfig::load(&dir.path().join("absent.json")).expect("load");
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("containd.json");
        std::fs::write(&path, r#"{"shutdown_timeout_ms": 1500, "terminate_timeout_ms": null}"#)
            .expect("write");

        let cfg = RuntimeConfig::load(&path).expect("load");
        assert_eq!(
            cfg.shutdown_timeout(),
            Timeout::After(Duration::from_millis(1500))
        );
        assert_eq!(cfg.terminate_timeout(), Timeout::Infinite);
        assert_eq!(
            cfg.servicing_terminate_timeout(),
            Timeout::After(Duration::from_secs(60))
        );
    }

    #[test]
    fn load_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            RuntimeConfig::load(&path),
            Err(ContaindError::Serialization { .. })
        ));
    }
}
