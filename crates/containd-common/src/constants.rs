//! Well-known names, default timeouts, and host status codes.

use std::time::Duration;

/// Friendly name reported for the first process started in a container.
pub const INIT_FRIENDLY_NAME: &str = "init";

/// Graceful shutdown bound used when the init process exits.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Forced termination bound used when graceful shutdown fails after exit.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Shutdown bound for a servicing container once servicing completes.
pub const SERVICING_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Termination bound for a servicing container whose shutdown failed.
pub const SERVICING_TERMINATE_TIMEOUT: Duration = Duration::from_secs(60);

/// First restart delay applied by the policy restart manager.
pub const RESTART_BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Factor applied to the restart delay on each consecutive restart.
pub const RESTART_BACKOFF_MULTIPLIER: u32 = 2;

/// Runs at least this long reset the restart delay to its initial value.
pub const RESTART_BACKOFF_RESET_AFTER: Duration = Duration::from_secs(10);

/// Property query flag asking the host to include the update-pending check.
pub const PROPERTY_QUERY_UPDATES_PENDING: u32 = 1;

/// Host status code: the pipe has been ended.
pub const ERROR_BROKEN_PIPE: u32 = 109;

/// Host status code: a system shutdown is already in progress.
pub const ERROR_SHUTDOWN_IN_PROGRESS: u32 = 1115;

/// Host status code: the specified path is invalid.
pub const ERROR_BAD_PATHNAME: u32 = 161;

/// Host status code: the system cannot find the path specified.
pub const ERROR_PATH_NOT_FOUND: u32 = 3;

/// Application name used in CLI output.
pub const APP_NAME: &str = "containd";
