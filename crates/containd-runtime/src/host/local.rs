//! Host compute service backed by plain host processes.
//!
//! An environment is a named group of child processes of the current
//! process. There is no isolation: this host exists to drive the lifecycle
//! core on a developer machine and from the CLI.

use std::collections::HashMap;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use containd_common::error::{HostError, HostErrorKind};
use containd_common::types::{ContainerId, Timeout};

use super::{ComputeService, ComputeSystemProperties, CreatedProcess, ProcessParams};

/// Host status code reported when an environment id is already in use.
const ERROR_ALREADY_EXISTS: u32 = 183;
/// Host status code reported for a call that does not fit the environment's phase.
const ERROR_INVALID_STATE: u32 = 5023;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
struct Environment {
    phase: Phase,
    processes: HashMap<u32, Child>,
}

/// Runs each environment's processes as children of the current process.
#[derive(Debug)]
pub struct LocalComputeService {
    systems: Mutex<HashMap<ContainerId, Environment>>,
    poll_interval: Duration,
}

impl LocalComputeService {
    /// Creates a host with no environments.
    #[must_use]
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Creates a host that checks process status at the given interval.
    #[must_use]
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            systems: Mutex::new(HashMap::new()),
            poll_interval,
        }
    }

    fn systems(&self) -> MutexGuard<'_, HashMap<ContainerId, Environment>> {
        self.systems.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of processes of an environment that have not exited.
    #[must_use]
    pub fn running_processes(&self, id: &ContainerId) -> usize {
        self.systems().get_mut(id).map_or(0, |env| {
            env.processes
                .values_mut()
                .filter_map(|child| matches!(child.try_wait(), Ok(None)).then_some(()))
                .count()
        })
    }
}

impl Default for LocalComputeService {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(operation: &'static str, id: &ContainerId) -> HostError {
    HostError::new(
        operation,
        HostErrorKind::PathNotFound,
        format!("environment {id} does not exist"),
    )
}

fn lookup<'a>(
    systems: &'a mut HashMap<ContainerId, Environment>,
    operation: &'static str,
    id: &ContainerId,
) -> Result<&'a mut Environment, HostError> {
    systems.get_mut(id).ok_or_else(|| not_found(operation, id))
}

fn shell_command(command_line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        let _ = cmd.arg("/C").arg(command_line);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        let _ = cmd.arg("-c").arg(command_line);
        cmd
    }
}

fn pipe_or_null(wanted: bool) -> Stdio {
    if wanted { Stdio::piped() } else { Stdio::null() }
}

#[allow(clippy::cast_sign_loss)]
fn exit_code(status: ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return code as u32;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }
    1
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match i32::try_from(child.id()) {
        Ok(raw) => {
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                tracing::debug!(pid = raw, error = %e, "SIGTERM not delivered");
            }
        }
        Err(_) => {
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.kill();
}

impl ComputeService for LocalComputeService {
    fn create_compute_system(&self, id: &ContainerId) -> Result<(), HostError> {
        let mut systems = self.systems();
        if let Some(existing) = systems.get(id) {
            if existing.phase != Phase::Stopped {
                return Err(HostError::new(
                    "create_compute_system",
                    HostErrorKind::Other(ERROR_ALREADY_EXISTS),
                    format!("environment {id} is still active"),
                ));
            }
        }
        let _ = systems.insert(
            id.clone(),
            Environment {
                phase: Phase::Created,
                processes: HashMap::new(),
            },
        );
        tracing::debug!(id = %id, "environment created");
        Ok(())
    }

    fn start(&self, id: &ContainerId) -> Result<(), HostError> {
        let mut systems = self.systems();
        let env = lookup(&mut systems, "start", id)?;
        match env.phase {
            Phase::Created | Phase::Running => {
                env.phase = Phase::Running;
                Ok(())
            }
            Phase::Stopped => Err(HostError::new(
                "start",
                HostErrorKind::Other(ERROR_INVALID_STATE),
                format!("environment {id} is stopped"),
            )),
        }
    }

    fn create_process(
        &self,
        id: &ContainerId,
        params: &ProcessParams,
    ) -> Result<CreatedProcess, HostError> {
        let mut systems = self.systems();
        let env = lookup(&mut systems, "create_process", id)?;
        if env.phase != Phase::Running {
            return Err(HostError::new(
                "create_process",
                HostErrorKind::Other(ERROR_INVALID_STATE),
                format!("environment {id} is not running"),
            ));
        }

        let mut cmd = shell_command(&params.command_line);
        let _ = cmd
            .envs(&params.environment)
            .stdin(pipe_or_null(params.create_stdin))
            .stdout(pipe_or_null(params.create_stdout))
            .stderr(pipe_or_null(params.create_stderr));
        if !params.working_directory.is_empty() {
            let _ = cmd.current_dir(&params.working_directory);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HostError::new(
                "create_process",
                HostErrorKind::from_code(e.raw_os_error().map_or(0, i32::unsigned_abs)),
                e.to_string(),
            )
        })?;
        let pid = child.id();
        let created = CreatedProcess {
            pid,
            stdin: child
                .stdin
                .take()
                .map(|s| Box::new(s) as Box<dyn std::io::Write + Send>),
            stdout: child
                .stdout
                .take()
                .map(|s| Box::new(s) as Box<dyn std::io::Read + Send>),
            stderr: child
                .stderr
                .take()
                .map(|s| Box::new(s) as Box<dyn std::io::Read + Send>),
        };
        let _ = env.processes.insert(pid, child);
        tracing::debug!(id = %id, pid, cmd = %params.command_line, "process created");
        Ok(created)
    }

    fn wait_for_exit(
        &self,
        id: &ContainerId,
        pid: u32,
        timeout: Timeout,
    ) -> Result<u32, HostError> {
        let deadline = timeout.as_duration().map(|d| Instant::now() + d);
        loop {
            {
                let mut systems = self.systems();
                let env = lookup(&mut systems, "wait_for_exit", id)?;
                let child = env.processes.get_mut(&pid).ok_or_else(|| {
                    HostError::new(
                        "wait_for_exit",
                        HostErrorKind::NotFound,
                        format!("process {pid} is not part of {id}"),
                    )
                })?;
                match child.try_wait() {
                    Ok(Some(status)) => return Ok(exit_code(status)),
                    Ok(None) => {}
                    Err(e) => {
                        return Err(HostError::new(
                            "wait_for_exit",
                            HostErrorKind::BrokenPipe,
                            e.to_string(),
                        ));
                    }
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(HostError::new(
                    "wait_for_exit",
                    HostErrorKind::Timeout,
                    format!("process {pid} still running"),
                ));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn shutdown(&self, id: &ContainerId, timeout: Timeout, reason: &str) -> Result<(), HostError> {
        tracing::debug!(id = %id, reason, "shutting down environment");
        {
            let mut systems = self.systems();
            let env = lookup(&mut systems, "shutdown", id)?;
            if env.phase == Phase::Stopped {
                return Err(HostError::new(
                    "shutdown",
                    HostErrorKind::ShutdownInProgress,
                    format!("environment {id} is already stopped"),
                ));
            }
            for child in env.processes.values_mut() {
                if matches!(child.try_wait(), Ok(None)) {
                    request_exit(child);
                }
            }
        }

        let deadline = timeout.as_duration().map(|d| Instant::now() + d);
        loop {
            {
                let mut systems = self.systems();
                let env = lookup(&mut systems, "shutdown", id)?;
                let all_exited = env
                    .processes
                    .values_mut()
                    .all(|child| !matches!(child.try_wait(), Ok(None)));
                if all_exited {
                    env.phase = Phase::Stopped;
                    return Ok(());
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(HostError::new(
                    "shutdown",
                    HostErrorKind::Timeout,
                    format!("environment {id} did not stop within {timeout}"),
                ));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn terminate(
        &self,
        id: &ContainerId,
        _timeout: Timeout,
        reason: &str,
    ) -> Result<(), HostError> {
        tracing::debug!(id = %id, reason, "terminating environment");
        let mut systems = self.systems();
        let env = lookup(&mut systems, "terminate", id)?;
        for (pid, child) in &mut env.processes {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill() {
                    tracing::debug!(pid, error = %e, "kill failed");
                }
                let _ = child.wait();
            }
        }
        env.phase = Phase::Stopped;
        Ok(())
    }

    fn get_properties(
        &self,
        id: &ContainerId,
        _flags: u32,
    ) -> Result<ComputeSystemProperties, HostError> {
        let mut systems = self.systems();
        let _ = lookup(&mut systems, "get_properties", id)?;
        Ok(ComputeSystemProperties::default())
    }
}
