//! Entry point for driving containers on a host.

use std::fmt;
use std::sync::Arc;

use containd_common::config::RuntimeConfig;
use containd_common::error::{ContaindError, Result};
use containd_common::types::{ContainerId, ProcessSpec};
use tokio::runtime::Handle;

use crate::backend::Backend;
use crate::container::{Container, CreateOption};
use crate::host::ComputeService;
use crate::registry::Registry;

struct Inner {
    host: Arc<dyn ComputeService>,
    backend: Arc<dyn Backend>,
    config: RuntimeConfig,
    registry: Registry,
    runtime: Handle,
}

/// Clonable handle over the host, the backend and the live-container
/// registry.
///
/// Calls are synchronous; exit monitors run as tasks on the given runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client with an empty registry.
    ///
    /// Every monitor, restart continuation and host call runs on `runtime`.
    /// Host waits block, so each live process holds one thread of the
    /// runtime's blocking pool until it exits; size `max_blocking_threads`
    /// above the number of processes expected to run at once, or later
    /// exits are only observed as earlier ones free a thread.
    #[must_use]
    pub fn new(
        host: Arc<dyn ComputeService>,
        backend: Arc<dyn Backend>,
        config: RuntimeConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                backend,
                config,
                registry: Registry::new(),
                runtime,
            }),
        }
    }

    /// Creates the container's environment and starts it.
    ///
    /// # Errors
    ///
    /// Returns an error if a container with the same friendly name is live,
    /// or if creating or starting the environment fails.
    pub fn create(
        &self,
        id: ContainerId,
        spec: ProcessSpec,
        options: Vec<CreateOption>,
    ) -> Result<()> {
        let container = Container::new(self.clone(), id, spec, options);
        if self.inner.registry.contains(container.friendly_name()) {
            return Err(ContaindError::AlreadyExists {
                name: container.friendly_name().to_owned(),
            });
        }
        tracing::info!(id = %container.id(), name = %container.friendly_name(), "creating container");
        self.inner.host.create_compute_system(container.id())?;
        container.start()
    }

    /// Runs an additional process inside a live container and returns its
    /// host process id. Its exit is reported as `ExitProcess`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown, the process cannot be
    /// created, or the backend refuses its streams.
    pub fn add_process(&self, friendly_name: &str, process: &str, spec: &ProcessSpec) -> Result<u32> {
        let container = self.lookup(friendly_name)?;
        container.exec(process, spec)
    }

    /// Stops a container on purpose: no restart follows its exit.
    ///
    /// A pending restart is canceled and reported as `Exit`, even when the
    /// restart manager ignores cancellation; otherwise the environment is
    /// terminated and the monitor reports the exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is unknown or termination fails.
    pub fn stop(&self, friendly_name: &str) -> Result<()> {
        let container = self.lookup(friendly_name)?;
        tracing::info!(id = %container.id(), name = friendly_name, "stop requested");
        container.request_stop();
        if container.is_restarting() {
            return Ok(());
        }
        match self.inner.host.terminate(
            container.id(),
            self.inner.config.terminate_timeout(),
            "stop",
        ) {
            Ok(()) => Ok(()),
            Err(e) if e.is_shutdown_race() => {
                tracing::debug!(id = %container.id(), error = %e, "already torn down");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the live container registered under `friendly_name`.
    #[must_use]
    pub fn get(&self, friendly_name: &str) -> Option<Arc<Container>> {
        self.inner.registry.get(friendly_name)
    }

    /// Returns all live containers.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Container>> {
        self.inner.registry.list()
    }

    /// Whether the container registered under `friendly_name` is waiting
    /// on a granted restart.
    #[must_use]
    pub fn is_restarting(&self, friendly_name: &str) -> bool {
        self.get(friendly_name).is_some_and(|c| c.is_restarting())
    }

    fn lookup(&self, friendly_name: &str) -> Result<Arc<Container>> {
        self.get(friendly_name).ok_or_else(|| ContaindError::NotFound {
            kind: "container",
            id: friendly_name.to_owned(),
        })
    }

    pub(crate) fn host(&self) -> Arc<dyn ComputeService> {
        Arc::clone(&self.inner.host)
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}
