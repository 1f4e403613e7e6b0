//! End-to-end runs against real child processes.

#![cfg(unix)]
#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use containd_common::config::RuntimeConfig;
use containd_common::error::Result;
use containd_common::types::{ContainerId, ProcessSpec};
use containd_runtime::host::local::LocalComputeService;
use containd_runtime::{
    Backend, Client, ComputeService, CreateOption, IoPipe, PolicyRestartManager, RestartPolicy,
    StateInfo, StateKind,
};
use tokio::sync::mpsc;

/// Collects stdout into a channel and forwards state changes.
struct CapturingBackend {
    output: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<StateInfo>,
}

impl Backend for CapturingBackend {
    fn attach_streams(&self, _id: &ContainerId, _process: &str, pipe: IoPipe) -> Result<()> {
        let output = self.output.clone();
        if let Some(mut stdout) = pipe.stdout {
            let _ = std::thread::spawn(move || {
                let mut text = String::new();
                let _ = stdout.read_to_string(&mut text);
                let _ = output.send(text);
            });
        }
        Ok(())
    }

    fn state_changed(&self, _id: &ContainerId, info: StateInfo) -> Result<()> {
        let _ = self.events.send(info);
        Ok(())
    }
}

struct Local {
    client: Client,
    output: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedReceiver<StateInfo>,
}

impl Local {
    fn new() -> Self {
        let (output_tx, output) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let host = Arc::new(LocalComputeService::with_poll_interval(Duration::from_millis(5)));
        let backend = Arc::new(CapturingBackend {
            output: output_tx,
            events: events_tx,
        });
        let client = Client::new(
            host as Arc<dyn ComputeService>,
            backend as Arc<dyn Backend>,
            RuntimeConfig::default(),
            tokio::runtime::Handle::current(),
        );
        Self {
            client,
            output,
            events,
        }
    }

    async fn next_event(&mut self) -> StateInfo {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("timed out waiting for state change")
            .expect("event channel closed")
    }
}

fn shell(command: &str) -> ProcessSpec {
    ProcessSpec::new(vec![command.to_owned()])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_code_and_output_reach_the_backend() {
    let mut local = Local::new();
    local
        .client
        .create(ContainerId::new("echo"), shell("echo ready; exit 7"), vec![])
        .expect("create");

    let start = local.next_event().await;
    assert_eq!(start.state, StateKind::Start);
    let exit = local.next_event().await;
    assert_eq!(exit.state, StateKind::Exit);
    assert_eq!(exit.exit_code, 7);
    assert_eq!(exit.pid, start.pid);

    let text = local.output.recv().await.expect("stdout captured");
    assert_eq!(text.trim(), "ready");
    assert!(local.client.list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_terminates_long_running_container() {
    let mut local = Local::new();
    local
        .client
        .create(
            ContainerId::new("sleeper"),
            shell("exec sleep 30"),
            vec![CreateOption::RestartManager(Arc::new(
                PolicyRestartManager::new(RestartPolicy::Always),
            ))],
        )
        .expect("create");
    assert_eq!(local.next_event().await.state, StateKind::Start);

    local.client.stop("sleeper").expect("stop");
    let exit = local.next_event().await;
    assert_eq!(exit.state, StateKind::Exit);
    assert!(local.client.get("sleeper").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn on_failure_policy_restarts_failing_command() {
    let mut local = Local::new();
    let rm = Arc::new(PolicyRestartManager::new(RestartPolicy::OnFailure {
        max_retries: 1,
    }));
    local
        .client
        .create(
            ContainerId::new("flaky"),
            shell("exit 2"),
            vec![CreateOption::RestartManager(rm.clone())],
        )
        .expect("create");

    let mut states = Vec::new();
    for _ in 0..4 {
        states.push(local.next_event().await.state);
    }
    assert_eq!(
        states,
        vec![
            StateKind::Start,
            StateKind::Restart,
            StateKind::Start,
            StateKind::Exit,
        ]
    );
    assert_eq!(rm.restart_count(), 1);
    assert!(local.client.list().is_empty());
}
