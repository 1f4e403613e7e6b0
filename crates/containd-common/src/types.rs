//! Domain primitive types used across the containd workspace.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable identifier of a container's isolated environment on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upper bound the host applies to a blocking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Timeout {
    /// Block until the operation completes.
    #[default]
    Infinite,
    /// Give up after the given duration.
    After(Duration),
}

impl Timeout {
    /// Returns the bound as a duration, `None` when infinite.
    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(d),
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Self {
        value.map_or(Self::Infinite, Self::After)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => write!(f, "infinite"),
            Self::After(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

/// Initial console dimensions for a terminal process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSize {
    /// Rows.
    pub height: u16,
    /// Columns.
    pub width: u16,
}

/// Validated definition of a process to run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Whether the host should emulate a console for the process.
    pub terminal: bool,
    /// Working directory inside the environment.
    pub cwd: String,
    /// Initial console size, meaningful only with `terminal`.
    pub console_size: ConsoleSize,
    /// Environment variables in `KEY=value` form.
    pub env: Vec<String>,
    /// Argument list; the first entry is the executable.
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// Creates a spec running the given argument list.
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Returns the argument list joined into a single command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.args.join(" ")
    }
}
