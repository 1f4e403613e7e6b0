//! Scripted host, recording backend and manual restart manager.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use containd_common::config::RuntimeConfig;
use containd_common::error::{ContaindError, HostError, HostErrorKind, RestartError, Result};
use containd_common::types::{ContainerId, ProcessSpec, Timeout};
use containd_runtime::host::{ComputeSystemProperties, CreatedProcess, ProcessParams};
use containd_runtime::restart::RestartWait;
use containd_runtime::{
    Backend, Client, ComputeService, IoPipe, RestartDecision, RestartManager, StateInfo,
};
use tokio::sync::{mpsc as async_mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    CreateSystem,
    Start,
    CreateProcess(String),
    Wait(u32),
    GetProperties,
    Shutdown(Timeout),
    Terminate(Timeout),
}

#[derive(Default)]
pub struct FakeHost {
    calls: Mutex<Vec<HostCall>>,
    next_pid: AtomicU32,
    exits: Mutex<HashMap<u32, mpsc::Sender<std::result::Result<u32, HostError>>>>,
    waiters: Mutex<HashMap<u32, mpsc::Receiver<std::result::Result<u32, HostError>>>>,
    pub create_process_error: Mutex<Option<HostError>>,
    pub shutdown_error: Mutex<Option<HostError>>,
    pub terminate_error: Mutex<Option<HostError>>,
    pub properties_error: Mutex<Option<HostError>>,
    pub updates_pending: AtomicBool,
    /// When set, `create_compute_system` blocks until every party arrives.
    pub create_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        let host = Self::default();
        host.next_pid.store(100, Ordering::SeqCst);
        Arc::new(host)
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&HostCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Makes the pending wait on `pid` return `outcome`.
    pub fn exit(&self, pid: u32, outcome: std::result::Result<u32, HostError>) {
        let tx = self.exits.lock().unwrap().remove(&pid).expect("unknown pid");
        tx.send(outcome).expect("waiter gone");
    }

    /// Fails every pending wait so blocked monitors can finish.
    pub fn release_all(&self) {
        self.exits.lock().unwrap().clear();
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ComputeService for FakeHost {
    fn create_compute_system(&self, _id: &ContainerId) -> std::result::Result<(), HostError> {
        self.record(HostCall::CreateSystem);
        let barrier = self.create_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            let _ = barrier.wait();
        }
        Ok(())
    }

    fn start(&self, _id: &ContainerId) -> std::result::Result<(), HostError> {
        self.record(HostCall::Start);
        Ok(())
    }

    fn create_process(
        &self,
        _id: &ContainerId,
        params: &ProcessParams,
    ) -> std::result::Result<CreatedProcess, HostError> {
        self.record(HostCall::CreateProcess(params.command_line.clone()));
        if let Some(err) = self.create_process_error.lock().unwrap().clone() {
            return Err(err);
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        let _ = self.exits.lock().unwrap().insert(pid, tx);
        let _ = self.waiters.lock().unwrap().insert(pid, rx);
        Ok(CreatedProcess {
            pid,
            stdin: Some(Box::new(std::io::sink())),
            stdout: Some(Box::new(std::io::empty())),
            stderr: params
                .create_stderr
                .then(|| Box::new(std::io::empty()) as Box<dyn std::io::Read + Send>),
        })
    }

    fn wait_for_exit(
        &self,
        _id: &ContainerId,
        pid: u32,
        _timeout: Timeout,
    ) -> std::result::Result<u32, HostError> {
        self.record(HostCall::Wait(pid));
        let rx = self.waiters.lock().unwrap().remove(&pid).expect("no waiter");
        rx.recv().unwrap_or_else(|_| {
            Err(HostError::new("wait_for_exit", HostErrorKind::BrokenPipe, "dropped"))
        })
    }

    fn shutdown(
        &self,
        _id: &ContainerId,
        timeout: Timeout,
        _reason: &str,
    ) -> std::result::Result<(), HostError> {
        self.record(HostCall::Shutdown(timeout));
        self.shutdown_error.lock().unwrap().clone().map_or(Ok(()), Err)
    }

    fn terminate(
        &self,
        _id: &ContainerId,
        timeout: Timeout,
        _reason: &str,
    ) -> std::result::Result<(), HostError> {
        self.record(HostCall::Terminate(timeout));
        self.terminate_error.lock().unwrap().clone().map_or(Ok(()), Err)
    }

    fn get_properties(
        &self,
        _id: &ContainerId,
        _flags: u32,
    ) -> std::result::Result<ComputeSystemProperties, HostError> {
        self.record(HostCall::GetProperties);
        if let Some(err) = self.properties_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(ComputeSystemProperties {
            updates_pending: self.updates_pending.load(Ordering::SeqCst),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Attached {
    pub id: ContainerId,
    pub process: String,
    pub terminal: bool,
    pub has_stdin: bool,
    pub has_stdout: bool,
    pub has_stderr: bool,
}

pub struct RecordingBackend {
    events: async_mpsc::UnboundedSender<(ContainerId, StateInfo)>,
    pub attached: Mutex<Vec<Attached>>,
    pub fail_attach: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> (Arc<Self>, async_mpsc::UnboundedReceiver<(ContainerId, StateInfo)>) {
        let (events, rx) = async_mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events,
                attached: Mutex::new(Vec::new()),
                fail_attach: AtomicBool::new(false),
            }),
            rx,
        )
    }
}

impl Backend for RecordingBackend {
    fn attach_streams(&self, id: &ContainerId, process: &str, pipe: IoPipe) -> Result<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(ContaindError::Backend {
                message: "attach refused".into(),
            });
        }
        self.attached.lock().unwrap().push(Attached {
            id: id.clone(),
            process: process.to_owned(),
            terminal: pipe.terminal,
            has_stdin: pipe.stdin.is_some(),
            has_stdout: pipe.stdout.is_some(),
            has_stderr: pipe.stderr.is_some(),
        });
        Ok(())
    }

    fn state_changed(&self, id: &ContainerId, info: StateInfo) -> Result<()> {
        self.events.send((id.clone(), info)).map_err(|e| ContaindError::Backend {
            message: e.to_string(),
        })
    }
}

/// Restart manager whose decisions and completions are driven by the test.
#[derive(Default)]
pub struct ManualRestart {
    pub grant: AtomicBool,
    pub fail_decision: AtomicBool,
    pub asked: Mutex<Vec<(u32, bool)>>,
    pending: Mutex<Option<oneshot::Sender<std::result::Result<(), RestartError>>>>,
    pub canceled: AtomicBool,
}

impl ManualRestart {
    pub fn granting() -> Arc<Self> {
        let rm = Self::default();
        rm.grant.store(true, Ordering::SeqCst);
        Arc::new(rm)
    }

    pub fn complete(&self, outcome: std::result::Result<(), RestartError>) {
        let tx = self.pending.lock().unwrap().take().expect("no pending restart");
        tx.send(outcome).expect("restart continuation gone");
    }
}

impl RestartManager for ManualRestart {
    fn should_restart(
        &self,
        exit_code: u32,
        ran_to_completion: bool,
        _elapsed: Duration,
    ) -> std::result::Result<RestartDecision, RestartError> {
        self.asked.lock().unwrap().push((exit_code, ran_to_completion));
        if self.fail_decision.load(Ordering::SeqCst) {
            return Err(RestartError::Active);
        }
        if !self.grant.load(Ordering::SeqCst) {
            return Ok(RestartDecision::Skip);
        }
        let (tx, rx): (_, RestartWait) = oneshot::channel();
        *self.pending.lock().unwrap() = Some(tx);
        Ok(RestartDecision::Restart(rx))
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(Err(RestartError::Canceled));
        }
    }
}

/// Grants every restart and keeps the default no-op `cancel`.
#[derive(Default)]
pub struct UncancelableRestart {
    pending: Mutex<Option<oneshot::Sender<std::result::Result<(), RestartError>>>>,
}

impl UncancelableRestart {
    pub fn complete(&self, outcome: std::result::Result<(), RestartError>) {
        let tx = self.pending.lock().unwrap().take().expect("no pending restart");
        tx.send(outcome).expect("restart continuation gone");
    }
}

impl RestartManager for UncancelableRestart {
    fn should_restart(
        &self,
        _exit_code: u32,
        _ran_to_completion: bool,
        _elapsed: Duration,
    ) -> std::result::Result<RestartDecision, RestartError> {
        let (tx, rx): (_, RestartWait) = oneshot::channel();
        *self.pending.lock().unwrap() = Some(tx);
        Ok(RestartDecision::Restart(rx))
    }
}

pub struct Harness {
    pub host: Arc<FakeHost>,
    pub backend: Arc<RecordingBackend>,
    pub events: async_mpsc::UnboundedReceiver<(ContainerId, StateInfo)>,
    pub client: Client,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runtime(tokio::runtime::Handle::current())
    }

    pub fn with_runtime(runtime: tokio::runtime::Handle) -> Self {
        let host = FakeHost::new();
        let (backend, events) = RecordingBackend::new();
        let client = Client::new(
            Arc::clone(&host) as Arc<dyn ComputeService>,
            Arc::clone(&backend) as Arc<dyn Backend>,
            RuntimeConfig::default(),
            runtime,
        );
        Self {
            host,
            backend,
            events,
            client,
        }
    }

    pub async fn next_event(&mut self) -> (ContainerId, StateInfo) {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for state change")
            .expect("event channel closed")
    }

    pub async fn assert_no_event(&mut self) {
        let res = tokio::time::timeout(Duration::from_millis(200), self.events.recv()).await;
        assert!(res.is_err(), "unexpected event: {res:?}");
    }

    /// Polls until `cond` holds, for state that settles after the last event.
    pub async fn eventually(&self, cond: impl Fn(&Client) -> bool) {
        for _ in 0..200 {
            if cond(&self.client) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.host.release_all();
    }
}

pub fn spec(args: &[&str]) -> ProcessSpec {
    ProcessSpec {
        terminal: false,
        cwd: "C:\\".into(),
        console_size: Default::default(),
        env: vec!["PATH=C:\\Windows".into()],
        args: args.iter().map(|s| (*s).to_owned()).collect(),
    }
}
