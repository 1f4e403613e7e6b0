//! `containd run`: run a command as a container and follow its lifecycle.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use containd_common::config::RuntimeConfig;
use containd_common::constants::INIT_FRIENDLY_NAME;
use containd_common::types::{ContainerId, ProcessSpec};
use containd_runtime::host::local::LocalComputeService;
use containd_runtime::{
    Backend, Client, ComputeService, CreateOption, PolicyRestartManager, RestartPolicy, StateInfo,
    StateKind,
};

use crate::output;
use crate::terminal::TerminalBackend;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Registry name of the container. Defaults to its generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Restart policy: no, always, unless-stopped or on-failure[:N].
    #[arg(long, default_value = "no")]
    pub restart: RestartPolicy,

    /// Run the process with an emulated console (stderr folds into stdout).
    #[arg(short, long)]
    pub tty: bool,

    /// Forward this terminal's stdin to the process.
    #[arg(short, long)]
    pub interactive: bool,

    /// Working directory of the process.
    #[arg(short, long, default_value = "")]
    pub workdir: String,

    /// Environment variable as KEY=VALUE. Repeatable.
    #[arg(short, long = "env", value_parser = parse_env)]
    pub env: Vec<String>,

    /// Command line to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn parse_env(value: &str) -> Result<String, String> {
    match value.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(value.to_owned()),
        _ => Err(format!("expected KEY=VALUE, got `{value}`")),
    }
}

/// Executes the `run` command.
///
/// Blocks until the init process reaches a final exit and returns its exit
/// code as this process's status.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the container
/// fails to start.
pub fn execute(args: RunArgs, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = match config_path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    tracing::debug!(?config, "runtime configuration");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("containd-worker")
        .build()
        .context("failed to build async runtime")?;

    let (events_tx, events) = mpsc::channel();
    let backend: Arc<dyn Backend> = Arc::new(TerminalBackend::new(events_tx, args.interactive));
    let host: Arc<dyn ComputeService> = Arc::new(LocalComputeService::new());
    let client = Client::new(host, backend, config, runtime.handle().clone());

    let id = ContainerId::generate();
    let name = args.name.clone().unwrap_or_else(|| id.to_string());
    let spec = ProcessSpec {
        terminal: args.tty,
        cwd: args.workdir.clone(),
        env: args.env.clone(),
        ..ProcessSpec::new(args.command.clone())
    };

    let mut options = vec![CreateOption::FriendlyName(name.clone())];
    if args.restart != RestartPolicy::No {
        options.push(CreateOption::RestartManager(Arc::new(
            PolicyRestartManager::with_runtime(args.restart, runtime.handle().clone()),
        )));
    }

    print_header(&name, &id, &spec, args.restart);
    client
        .create(id, spec, options)
        .with_context(|| format!("failed to start container {name}"))?;

    install_stop_handler(&client, &name)?;

    let status = follow(&name, &events);
    runtime.shutdown_timeout(Duration::from_secs(1));
    status.map(ExitCode::from)
}

fn print_header(name: &str, id: &ContainerId, spec: &ProcessSpec, restart: RestartPolicy) {
    eprintln!();
    eprintln!("  {BOLD}containd{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!("  {BOLD}{name}{RESET} {DIM}[{id}] restart={restart}{RESET}");
    eprintln!("  {DIM}$ {}{RESET}", spec.command_line());
    eprintln!();
}

fn install_stop_handler(client: &Client, name: &str) -> anyhow::Result<()> {
    let client = client.clone();
    let name = name.to_owned();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("  Stopping {BOLD}{name}{RESET}...");
        if let Err(e) = client.stop(&name) {
            tracing::warn!(name = %name, error = %e, "stop failed");
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))
}

/// Prints state changes until the init process exits for good.
fn follow(name: &str, events: &mpsc::Receiver<(ContainerId, StateInfo)>) -> anyhow::Result<u8> {
    for (_, info) in events {
        eprintln!("{}", output::format_state(name, &info));
        if info.process_id == INIT_FRIENDLY_NAME && info.state == StateKind::Exit {
            return Ok(output::exit_status(info.exit_code));
        }
    }
    Err(anyhow::anyhow!("lost track of container {name}"))
}
