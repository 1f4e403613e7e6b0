//! Host compute service abstraction.
//!
//! The host creates isolated environments, runs processes inside them and
//! tears them down. Every call may block; the lifecycle core moves them off
//! the async workers before invoking them.

pub mod local;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

use containd_common::error::HostError;
use containd_common::types::{ConsoleSize, ContainerId, ProcessSpec, Timeout};

/// Parameters for creating a process inside an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessParams {
    /// Full command line as a single string.
    pub command_line: String,
    /// Environment variables keyed by name.
    pub environment: BTreeMap<String, String>,
    /// Working directory inside the environment.
    pub working_directory: String,
    /// Whether the host emulates a console.
    pub emulate_console: bool,
    /// Initial console dimensions.
    pub console_size: ConsoleSize,
    /// Whether a stdin channel is created.
    pub create_stdin: bool,
    /// Whether a stdout channel is created.
    pub create_stdout: bool,
    /// Whether a stderr channel is created.
    pub create_stderr: bool,
}

impl ProcessParams {
    /// Builds creation parameters for a process spec.
    ///
    /// Stdin and stdout are always requested so output stays capturable;
    /// stderr only outside terminal mode, where the console multiplexes it
    /// into stdout.
    #[must_use]
    pub fn from_spec(spec: &ProcessSpec) -> Self {
        Self {
            command_line: spec.command_line(),
            environment: environment_map(&spec.env),
            working_directory: spec.cwd.clone(),
            emulate_console: spec.terminal,
            console_size: spec.console_size,
            create_stdin: true,
            create_stdout: true,
            create_stderr: !spec.terminal,
        }
    }
}

/// Converts `KEY=value` entries into a map; entries without a key are dropped.
fn environment_map(env: &[String]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|entry| entry.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

/// A process the host has just created.
pub struct CreatedProcess {
    /// Host-assigned process id.
    pub pid: u32,
    /// Write end of the process's stdin.
    pub stdin: Option<Box<dyn Write + Send>>,
    /// Read end of the process's stdout.
    pub stdout: Option<Box<dyn Read + Send>>,
    /// Read end of the process's stderr.
    pub stderr: Option<Box<dyn Read + Send>>,
}

impl fmt::Debug for CreatedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Properties of an environment as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeSystemProperties {
    /// The environment has updates waiting to be merged.
    pub updates_pending: bool,
}

/// Capabilities the lifecycle core needs from the host.
pub trait ComputeService: Send + Sync {
    /// Creates an environment under the given id, replacing a stopped one.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot create the environment.
    fn create_compute_system(&self, id: &ContainerId) -> Result<(), HostError>;

    /// Starts an environment. For a servicing environment this blocks until
    /// servicing completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be started.
    fn start(&self, id: &ContainerId) -> Result<(), HostError>;

    /// Creates a process inside a started environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be created.
    fn create_process(
        &self,
        id: &ContainerId,
        params: &ProcessParams,
    ) -> Result<CreatedProcess, HostError>;

    /// Blocks until the process exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails, typically with a broken pipe
    /// when the environment was killed underneath the waiter.
    fn wait_for_exit(&self, id: &ContainerId, pid: u32, timeout: Timeout)
    -> Result<u32, HostError>;

    /// Requests a graceful shutdown of the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails or races another teardown.
    fn shutdown(&self, id: &ContainerId, timeout: Timeout, reason: &str) -> Result<(), HostError>;

    /// Forcibly terminates the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    fn terminate(&self, id: &ContainerId, timeout: Timeout, reason: &str)
    -> Result<(), HostError>;

    /// Queries environment properties; `flags` selects optional checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be queried.
    fn get_properties(
        &self,
        id: &ContainerId,
        flags: u32,
    ) -> Result<ComputeSystemProperties, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(terminal: bool) -> ProcessSpec {
        ProcessSpec {
            terminal,
            cwd: "C:\\work".into(),
            console_size: ConsoleSize {
                height: 24,
                width: 80,
            },
            env: vec!["PATH=C:\\bin".into(), "EMPTY=".into(), "=bad".into(), "noequals".into()],
            args: vec!["app.exe".into(), "--serve".into()],
        }
    }

    #[test]
    fn stderr_is_requested_only_without_terminal() {
        let plain = ProcessParams::from_spec(&spec(false));
        assert!(plain.create_stdin && plain.create_stdout && plain.create_stderr);

        let tty = ProcessParams::from_spec(&spec(true));
        assert!(tty.create_stdin && tty.create_stdout);
        assert!(!tty.create_stderr);
        assert!(tty.emulate_console);
    }

    #[test]
    fn params_carry_joined_command_line_and_env_map() {
        let params = ProcessParams::from_spec(&spec(false));
        assert_eq!(params.command_line, "app.exe --serve");
        assert_eq!(params.working_directory, "C:\\work");
        assert_eq!(params.console_size.width, 80);
        assert_eq!(params.environment.len(), 2);
        assert_eq!(params.environment["PATH"], "C:\\bin");
        assert_eq!(params.environment["EMPTY"], "");
    }
}
