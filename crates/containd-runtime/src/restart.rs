//! Restart decisions for exited containers.
//!
//! The lifecycle core only sees the [`RestartManager`] trait. The
//! [`PolicyRestartManager`] implements the usual `no` / `always` /
//! `unless-stopped` / `on-failure[:N]` policies with exponential backoff.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use containd_common::constants::{
    RESTART_BACKOFF_INITIAL, RESTART_BACKOFF_MULTIPLIER, RESTART_BACKOFF_RESET_AFTER,
};
use containd_common::error::{ContaindError, RestartError};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

/// Resolves once a granted restart may proceed, or with the reason it won't.
pub type RestartWait = oneshot::Receiver<Result<(), RestartError>>;

/// Outcome of asking a restart manager about an exited container.
#[derive(Debug)]
pub enum RestartDecision {
    /// Leave the container stopped.
    Skip,
    /// Restart once the completion signal resolves successfully.
    Restart(RestartWait),
}

/// Decides whether and when an exited container is relaunched.
pub trait RestartManager: Send + Sync {
    /// Asks whether to restart after an exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager was canceled or a previous restart is
    /// still pending.
    fn should_restart(
        &self,
        exit_code: u32,
        ran_to_completion: bool,
        elapsed: Duration,
    ) -> Result<RestartDecision, RestartError>;

    /// Cancels pending and future restarts.
    fn cancel(&self) {}
}

/// When a container is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    No,
    /// Restart on every exit.
    Always,
    /// Restart on every exit that was not caused by a stop.
    UnlessStopped,
    /// Restart on non-zero exit, at most `max_retries` times (0 = unlimited).
    OnFailure {
        /// Retry limit, zero for unlimited.
        max_retries: u32,
    },
}

impl FromStr for RestartPolicy {
    type Err = ContaindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ContaindError::Config {
            message: format!("invalid restart policy: {s}"),
        };
        match s.split_once(':') {
            None => match s {
                "" | "no" => Ok(Self::No),
                "always" => Ok(Self::Always),
                "unless-stopped" => Ok(Self::UnlessStopped),
                "on-failure" => Ok(Self::OnFailure { max_retries: 0 }),
                _ => Err(invalid()),
            },
            Some(("on-failure", count)) => count
                .parse()
                .map(|max_retries| Self::OnFailure { max_retries })
                .map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }
}

impl TryFrom<String> for RestartPolicy {
    type Error = ContaindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RestartPolicy> for String {
    fn from(value: RestartPolicy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Always => write!(f, "always"),
            Self::UnlessStopped => write!(f, "unless-stopped"),
            Self::OnFailure { max_retries: 0 } => write!(f, "on-failure"),
            Self::OnFailure { max_retries } => write!(f, "on-failure:{max_retries}"),
        }
    }
}

#[derive(Debug, Default)]
struct Backoff {
    restart_count: u32,
    delay: Option<Duration>,
    active: bool,
    canceled: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<Backoff>,
    cancel: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, Backoff> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restart manager driven by a [`RestartPolicy`] with exponential backoff.
///
/// The first restart waits 100ms and each consecutive restart doubles the
/// delay; a run of ten seconds or more resets it. The completion signal is
/// driven by a task on the runtime given to [`with_runtime`], or on the
/// caller's runtime when none was given.
///
/// [`with_runtime`]: PolicyRestartManager::with_runtime
#[derive(Debug, Clone)]
pub struct PolicyRestartManager {
    policy: RestartPolicy,
    shared: Arc<Shared>,
    runtime: Option<Handle>,
}

impl PolicyRestartManager {
    /// Creates a manager for the given policy.
    #[must_use]
    pub fn new(policy: RestartPolicy) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            policy,
            shared: Arc::new(Shared {
                state: Mutex::new(Backoff::default()),
                cancel,
            }),
            runtime: None,
        }
    }

    /// Creates a manager whose backoff timers run on `runtime`.
    #[must_use]
    pub fn with_runtime(policy: RestartPolicy, runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            ..Self::new(policy)
        }
    }

    /// Returns the policy this manager applies.
    #[must_use]
    pub const fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Returns how many restarts have been granted so far.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.shared.state().restart_count
    }

    const fn wants_restart(&self, exit_code: u32, ran_to_completion: bool, count: u32) -> bool {
        match self.policy {
            RestartPolicy::No => false,
            RestartPolicy::Always => true,
            RestartPolicy::UnlessStopped => !ran_to_completion,
            RestartPolicy::OnFailure { max_retries } => {
                (max_retries == 0 || count < max_retries) && exit_code != 0
            }
        }
    }
}

impl RestartManager for PolicyRestartManager {
    fn should_restart(
        &self,
        exit_code: u32,
        ran_to_completion: bool,
        elapsed: Duration,
    ) -> Result<RestartDecision, RestartError> {
        if self.policy == RestartPolicy::No {
            return Ok(RestartDecision::Skip);
        }
        let (runtime, delay) = {
            let mut state = self.shared.state();
            if state.canceled {
                return Err(RestartError::Canceled);
            }
            if state.active {
                return Err(RestartError::Active);
            }

            if elapsed >= RESTART_BACKOFF_RESET_AFTER {
                state.delay = None;
            }
            let delay = state.delay.map_or(RESTART_BACKOFF_INITIAL, |d| {
                d.saturating_mul(RESTART_BACKOFF_MULTIPLIER)
            });
            state.delay = Some(delay);

            if !self.wants_restart(exit_code, ran_to_completion, state.restart_count) {
                return Ok(RestartDecision::Skip);
            }
            let runtime = match &self.runtime {
                Some(runtime) => runtime.clone(),
                None => Handle::try_current().map_err(|_| RestartError::NoRuntime)?,
            };
            state.restart_count += 1;
            state.active = true;
            (runtime, delay)
        };

        tracing::debug!(policy = %self.policy, ?delay, exit_code, "restart granted");
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let mut canceled = self.shared.cancel.subscribe();
        let _ = runtime.spawn(async move {
            let cancel_requested = async {
                if *canceled.borrow_and_update() {
                    return;
                }
                let _ = canceled.changed().await;
            };
            tokio::select! {
                () = cancel_requested => {
                    let _ = tx.send(Err(RestartError::Canceled));
                }
                () = tokio::time::sleep(delay) => {
                    shared.state().active = false;
                    let _ = tx.send(Ok(()));
                }
            }
        });
        Ok(RestartDecision::Restart(rx))
    }

    fn cancel(&self) {
        let mut state = self.shared.state();
        if !state.canceled {
            state.canceled = true;
            let _ = self.shared.cancel.send_replace(true);
            tracing::debug!(policy = %self.policy, "restart manager canceled");
        }
    }
}
