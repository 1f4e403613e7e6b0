//! The container lifecycle state machine.
//!
//! [`Container::start`] brings the environment up, creates the init process
//! and hands its streams to the backend. From then on a background monitor
//! owns the process: it blocks on the host until the process exits, tears
//! the environment down, consults the restart manager and sends exactly one
//! terminal notification. A granted restart continues in a follow-up task
//! that re-creates the container once the restart manager lets it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use containd_common::constants::{INIT_FRIENDLY_NAME, PROPERTY_QUERY_UPDATES_PENDING};
use containd_common::error::{ContaindError, HostError, HostErrorKind, RestartError, Result};
use containd_common::types::{ContainerId, ProcessSpec, Timeout};
use tokio::sync::oneshot;

use crate::client::Client;
use crate::host::{ComputeService, ProcessParams};
use crate::iopipe::IoPipe;
use crate::restart::{RestartDecision, RestartManager, RestartWait};
use crate::state::{StateInfo, StateKind};

/// Option supplied when a container is created.
#[derive(Clone)]
pub enum CreateOption {
    /// Run the environment only to apply servicing, then shut it down.
    Servicing {
        /// Whether servicing mode is on.
        is_servicing: bool,
    },
    /// Restart manager consulted when the init process exits.
    RestartManager(Arc<dyn RestartManager>),
    /// Registry key; defaults to the container id.
    FriendlyName(String),
}

impl fmt::Debug for CreateOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Servicing { is_servicing } => f
                .debug_struct("Servicing")
                .field("is_servicing", is_servicing)
                .finish(),
            Self::RestartManager(_) => f.write_str("RestartManager(..)"),
            Self::FriendlyName(name) => f.debug_tuple("FriendlyName").field(name).finish(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RuntimeState {
    system_pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
}

/// A container and its runtime flags.
///
/// Identity, spec and options are fixed at creation. The runtime state is
/// written by `start` and read by the monitor; `manual_stop_requested` may
/// be set from any thread and is only ever read as a relaxed hint.
pub struct Container {
    id: ContainerId,
    friendly_name: String,
    spec: ProcessSpec,
    options: Vec<CreateOption>,
    restart_manager: Option<Arc<dyn RestartManager>>,
    client: Client,
    state: Mutex<RuntimeState>,
    manual_stop_requested: AtomicBool,
    restarting: AtomicBool,
}

impl Container {
    pub(crate) fn new(
        client: Client,
        id: ContainerId,
        spec: ProcessSpec,
        options: Vec<CreateOption>,
    ) -> Arc<Self> {
        let friendly_name = options
            .iter()
            .find_map(|option| match option {
                CreateOption::FriendlyName(name) => Some(name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| id.to_string());
        let restart_manager = options.iter().find_map(|option| match option {
            CreateOption::RestartManager(rm) => Some(Arc::clone(rm)),
            _ => None,
        });
        Arc::new(Self {
            id,
            friendly_name,
            spec,
            options,
            restart_manager,
            client,
            state: Mutex::new(RuntimeState::default()),
            manual_stop_requested: AtomicBool::new(false),
            restarting: AtomicBool::new(false),
        })
    }

    /// Stable identifier of the container's environment.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Registry key of the container.
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// Definition of the init process.
    #[must_use]
    pub const fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Options the container was created with.
    #[must_use]
    pub fn options(&self) -> &[CreateOption] {
        &self.options
    }

    /// Host process id of the init process, once started.
    #[must_use]
    pub fn system_pid(&self) -> Option<u32> {
        self.state().system_pid
    }

    /// When the init process was started.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state().started_at
    }

    /// Whether a restart attempt is in flight.
    #[must_use]
    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::Relaxed)
    }

    /// Whether an explicit stop was requested.
    #[must_use]
    pub fn manual_stop_requested(&self) -> bool {
        self.manual_stop_requested.load(Ordering::Relaxed)
    }

    /// Whether the container only runs to apply servicing.
    #[must_use]
    pub fn is_servicing(&self) -> bool {
        self.options
            .iter()
            .any(|option| matches!(option, CreateOption::Servicing { is_servicing: true }))
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the container as stopped on purpose and cancels any restart.
    ///
    /// A monitor that already decided to restart is not called back; the
    /// canceled restart manager fails the pending restart instead.
    pub(crate) fn request_stop(&self) {
        self.manual_stop_requested.store(true, Ordering::Relaxed);
        if let Some(rm) = &self.restart_manager {
            rm.cancel();
        }
    }

    /// Starts the environment and its init process.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be started, servicing
    /// shutdown fails, or the init process cannot be created. A friendly
    /// name taken by a concurrent create yields `AlreadyExists` after the
    /// environment is terminated, with no monitor and no notification. If
    /// the backend refuses the streams the monitor is already running and
    /// reports the exit.
    pub(crate) fn start(self: &Arc<Self>) -> Result<()> {
        let host = self.client.host();
        tracing::debug!(id = %self.id, "starting container");
        if let Err(e) = host.start(&self.id) {
            tracing::error!(id = %self.id, error = %e, "failed to start compute system");
            return Err(e.into());
        }

        if self.is_servicing() {
            return self.finish_servicing();
        }

        let params = ProcessParams::from_spec(&self.spec);
        let created = match host.create_process(&self.id, &params) {
            Ok(created) => created,
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "create process failed");
                let timeout = self.client.config().create_failure_terminate_timeout();
                match host.terminate(&self.id, timeout, "create process failed") {
                    Ok(()) => tracing::debug!(id = %self.id, "terminated after failed create"),
                    Err(e2) => {
                        tracing::warn!(id = %self.id, error = %e2, "terminate after failed create, ignoring");
                    }
                }
                return Err(e.into());
            }
        };

        let pid = created.pid;
        {
            let mut state = self.state();
            state.started_at = Some(Utc::now());
            state.system_pid = Some(pid);
        }
        let pipe = IoPipe::new(
            created.stdin,
            created.stdout,
            created.stderr,
            self.spec.terminal,
        );
        tracing::debug!(id = %self.id, pid, "process started");

        if !self.client.registry().register(Arc::clone(self)) {
            tracing::error!(
                id = %self.id,
                name = %self.friendly_name,
                "friendly name already registered"
            );
            let timeout = self.client.config().terminate_timeout();
            if let Err(e) = host.terminate(&self.id, timeout, "friendly name taken") {
                tracing::warn!(id = %self.id, error = %e, "terminate after name clash, ignoring");
            }
            return Err(ContaindError::AlreadyExists {
                name: self.friendly_name.clone(),
            });
        }

        let started = self.spawn_monitor(pid, INIT_FRIENDLY_NAME.to_owned(), true);

        self.client
            .backend()
            .attach_streams(&self.id, INIT_FRIENDLY_NAME, pipe)?;

        self.notify(StateInfo::started(pid, INIT_FRIENDLY_NAME));
        drop(started);
        Ok(())
    }

    /// Shuts a serviced environment down; servicing is complete once the
    /// host start returned.
    fn finish_servicing(&self) -> Result<()> {
        let host = self.client.host();
        let config = self.client.config();
        tracing::debug!(id = %self.id, "servicing complete, shutting down");
        if let Err(e) = host.shutdown(
            &self.id,
            config.servicing_shutdown_timeout(),
            "servicing complete",
        ) {
            tracing::error!(id = %self.id, error = %e, "failed during cleanup of servicing container");
            if let Err(e2) = host.terminate(
                &self.id,
                config.servicing_terminate_timeout(),
                "servicing shutdown failed",
            ) {
                tracing::error!(id = %self.id, error = %e2, "failed to terminate after shutdown failure");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Creates an additional process inside the running environment.
    pub(crate) fn exec(self: &Arc<Self>, process: &str, spec: &ProcessSpec) -> Result<u32> {
        let params = ProcessParams::from_spec(spec);
        let created = self
            .client
            .host()
            .create_process(&self.id, &params)
            .inspect_err(|e| {
                tracing::error!(id = %self.id, process, error = %e, "exec create process failed");
            })?;

        let pid = created.pid;
        let pipe = IoPipe::new(created.stdin, created.stdout, created.stderr, spec.terminal);
        let started = self.spawn_monitor(pid, process.to_owned(), false);
        self.client.backend().attach_streams(&self.id, process, pipe)?;
        drop(started);
        tracing::debug!(id = %self.id, pid, process, "exec process started");
        Ok(pid)
    }

    /// Launches the monitor for `pid`.
    ///
    /// The monitor holds its exit handling until the returned sender is
    /// dropped, so registration and the start notification always precede
    /// teardown.
    fn spawn_monitor(
        self: &Arc<Self>,
        pid: u32,
        process: String,
        is_init: bool,
    ) -> oneshot::Sender<()> {
        let (started, gate) = oneshot::channel();
        let _ = self
            .client
            .runtime()
            .spawn(Arc::clone(self).wait_exit(pid, process, is_init, gate));
        started
    }

    async fn wait_exit(
        self: Arc<Self>,
        pid: u32,
        process: String,
        is_init: bool,
        started: oneshot::Receiver<()>,
    ) {
        tracing::debug!(id = %self.id, pid, process = %process, "waiting for process exit");

        let exit_code = match self
            .host_call("wait_for_exit", move |host, id| {
                host.wait_for_exit(id, pid, Timeout::Infinite)
            })
            .await
        {
            Ok(code) => code,
            Err(e) => {
                if e.is_broken_pipe() {
                    tracing::debug!(id = %self.id, pid, "wait ended with broken pipe");
                } else {
                    tracing::warn!(id = %self.id, pid, error = %e, "wait for process failed (container may have been killed)");
                }
                0
            }
        };
        let _ = started.await;

        let mut si = StateInfo::exited(pid, exit_code, process);
        let mut pending_restart = None;

        if is_init {
            si.update_pending = self.updates_pending().await;
            self.shutdown_compute_system().await;

            if let Some(wait) = self.decide_restart(exit_code) {
                si.state = StateKind::Restart;
                self.restarting.store(true, Ordering::Relaxed);
                pending_restart = Some(wait);
            }

            if si.state == StateKind::Exit {
                let _ = self.client.registry().deregister_instance(&self);
            }
        } else {
            si.state = StateKind::ExitProcess;
        }

        self.notify(si.clone());

        if let Some(wait) = pending_restart {
            let _ = self
                .client
                .runtime()
                .spawn(Arc::clone(&self).complete_restart(wait, si));
        }
        tracing::debug!(id = %self.id, pid, "monitor finished");
    }

    async fn updates_pending(&self) -> bool {
        match self
            .host_call("get_properties", |host, id| {
                host.get_properties(id, PROPERTY_QUERY_UPDATES_PENDING)
            })
            .await
        {
            Ok(properties) => properties.updates_pending,
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "get properties failed (container may have been killed)");
                false
            }
        }
    }

    /// Shuts the environment down, terminating it when shutdown fails for
    /// any reason other than a concurrent teardown.
    async fn shutdown_compute_system(&self) {
        let config = self.client.config();
        let shutdown_timeout = config.shutdown_timeout();
        let terminate_timeout = config.terminate_timeout();

        tracing::debug!(id = %self.id, "shutting down container");
        let Err(e) = self
            .host_call("shutdown", move |host, id| {
                host.shutdown(id, shutdown_timeout, "waitExit")
            })
            .await
        else {
            tracing::debug!(id = %self.id, "completed shutting down container");
            return;
        };

        if e.is_shutdown_race() {
            tracing::debug!(id = %self.id, error = %e, "shutdown already under way");
            return;
        }

        tracing::debug!(id = %self.id, error = %e, "shutdown failed, terminating");
        match self
            .host_call("terminate", move |host, id| {
                host.terminate(id, terminate_timeout, "waitExit")
            })
            .await
        {
            Ok(()) => tracing::debug!(id = %self.id, "terminated after failed shutdown"),
            Err(e) => tracing::debug!(id = %self.id, error = %e, "ignoring terminate failure"),
        }
    }

    fn decide_restart(&self, exit_code: u32) -> Option<RestartWait> {
        if self.manual_stop_requested() {
            return None;
        }
        let rm = self.restart_manager.as_ref()?;
        match rm.should_restart(exit_code, false, self.elapsed()) {
            Ok(RestartDecision::Restart(wait)) => Some(wait),
            Ok(RestartDecision::Skip) => None,
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "restart decision failed");
                None
            }
        }
    }

    fn elapsed(&self) -> Duration {
        self.started_at()
            .and_then(|at| Utc::now().signed_duration_since(at).to_std().ok())
            .unwrap_or_default()
    }

    /// Waits for the restart manager, then re-creates the container or
    /// reports the downgraded exit.
    ///
    /// A stop requested while the restart was pending wins over a granted
    /// restart, whether or not the manager honors `cancel`.
    async fn complete_restart(self: Arc<Self>, wait: RestartWait, mut si: StateInfo) {
        let mut outcome = wait.await.unwrap_or(Err(RestartError::Interrupted));
        if outcome.is_ok() && self.manual_stop_requested() {
            outcome = Err(RestartError::Canceled);
        }
        self.restarting.store(false, Ordering::Relaxed);
        let _ = self.client.registry().deregister_instance(&self);

        if let Err(e) = outcome {
            si.state = StateKind::Exit;
            self.notify(si);
            tracing::error!(id = %self.id, error = %e, "restart abandoned");
            return;
        }

        tracing::info!(id = %self.id, name = %self.friendly_name, "restarting container");
        let client = self.client.clone();
        let id = self.id.clone();
        let spec = self.spec.clone();
        let options = self.options.clone();
        let recreate = self
            .client
            .runtime()
            .spawn_blocking(move || client.create(id, spec, options));
        match recreate.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(id = %self.id, error = %e, "re-create after restart failed");
            }
            Err(e) => tracing::error!(id = %self.id, error = %e, "re-create task failed"),
        }
    }

    fn notify(&self, si: StateInfo) {
        tracing::debug!(id = %self.id, state = %si, "notifying backend");
        if let Err(e) = self.client.backend().state_changed(&self.id, si) {
            tracing::error!(id = %self.id, error = %e, "state change notification failed");
        }
    }

    /// Runs a blocking host call on the blocking pool.
    async fn host_call<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> std::result::Result<T, HostError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ComputeService, &ContainerId) -> std::result::Result<T, HostError>
            + Send
            + 'static,
    {
        let host = self.client.host();
        let id = self.id.clone();
        self.client
            .runtime()
            .spawn_blocking(move || call(host.as_ref(), &id))
            .await
            .unwrap_or_else(|e| {
                Err(HostError::new(
                    operation,
                    HostErrorKind::Other(0),
                    e.to_string(),
                ))
            })
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("friendly_name", &self.friendly_name)
            .field("spec", &self.spec)
            .field("options", &self.options)
            .field("state", &*self.state())
            .field("manual_stop_requested", &self.manual_stop_requested())
            .field("restarting", &self.is_restarting())
            .finish_non_exhaustive()
    }
}
