//! The engine-facing side of the lifecycle core.

use containd_common::error::Result;
use containd_common::types::ContainerId;

use crate::iopipe::IoPipe;
use crate::state::StateInfo;

/// Receives process streams and lifecycle notifications.
///
/// Notifications are best-effort: the lifecycle core logs a failed
/// `state_changed` and never retries it.
pub trait Backend: Send + Sync {
    /// Hands the streams of a freshly started process to the engine.
    ///
    /// `process` is the friendly name of the process the streams belong to.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot take the streams.
    fn attach_streams(&self, id: &ContainerId, process: &str, pipe: IoPipe) -> Result<()>;

    /// Reports a lifecycle transition of a container or one of its processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the notification.
    fn state_changed(&self, id: &ContainerId, info: StateInfo) -> Result<()>;
}
