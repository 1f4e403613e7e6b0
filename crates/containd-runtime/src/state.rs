//! Lifecycle transition notifications sent to the backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateKind {
    /// The init process is running and its streams are attached.
    Start,
    /// The init process exited and the container will not come back.
    Exit,
    /// An exec'd process exited; the container keeps running.
    ExitProcess,
    /// The init process exited and a restart is pending.
    Restart,
}

impl StateKind {
    /// Whether no further notification follows for this lifecycle instance.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exit | Self::ExitProcess)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Exit => write!(f, "exit"),
            Self::ExitProcess => write!(f, "exit-process"),
            Self::Restart => write!(f, "restart"),
        }
    }
}

/// A single lifecycle transition, sent by value to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    /// What happened.
    pub state: StateKind,
    /// Host process id of the process that changed.
    pub pid: u32,
    /// Exit code, zero for `Start`.
    pub exit_code: u32,
    /// Friendly name of the process that changed.
    pub process_id: String,
    /// Host reports pending updates; only meaningful for an init exit.
    pub update_pending: bool,
}

impl StateInfo {
    /// Notification that the init process started.
    #[must_use]
    pub fn started(pid: u32, process_id: impl Into<String>) -> Self {
        Self {
            state: StateKind::Start,
            pid,
            exit_code: 0,
            process_id: process_id.into(),
            update_pending: false,
        }
    }

    /// Notification that a process exited with the given code.
    #[must_use]
    pub fn exited(pid: u32, exit_code: u32, process_id: impl Into<String>) -> Self {
        Self {
            state: StateKind::Exit,
            pid,
            exit_code,
            process_id: process_id.into(),
            update_pending: false,
        }
    }
}

impl fmt::Display for StateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (pid {}", self.state, self.process_id, self.pid)?;
        if self.state != StateKind::Start {
            write!(f, ", exit code {}", self.exit_code)?;
        }
        if self.update_pending {
            write!(f, ", update pending")?;
        }
        write!(f, ")")
    }
}
