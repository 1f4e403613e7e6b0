//! Backend that copies container output to this terminal.

use std::io::{self, Read, Write};
use std::sync::mpsc::Sender;
use std::thread;

use containd_common::error::{ContaindError, Result};
use containd_common::types::ContainerId;
use containd_runtime::{Backend, IoPipe, StateInfo};

/// Copies process output to the local stdout/stderr and forwards state
/// changes to the waiting command.
pub struct TerminalBackend {
    events: Sender<(ContainerId, StateInfo)>,
    forward_stdin: bool,
}

impl TerminalBackend {
    pub const fn new(events: Sender<(ContainerId, StateInfo)>, forward_stdin: bool) -> Self {
        Self {
            events,
            forward_stdin,
        }
    }
}

fn spawn_copy<R, W>(name: String, mut from: R, mut to: W) -> Result<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let stream = name.clone();
    let _ = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            if let Err(e) = io::copy(&mut from, &mut to) {
                tracing::debug!(stream = %stream, error = %e, "stream copy ended");
            }
            let _ = to.flush();
        })
        .map_err(|e| ContaindError::Backend {
            message: format!("failed to spawn {name}: {e}"),
        })?;
    Ok(())
}

impl Backend for TerminalBackend {
    fn attach_streams(&self, id: &ContainerId, process: &str, pipe: IoPipe) -> Result<()> {
        tracing::debug!(id = %id, process, ?pipe, "attaching streams");
        if let Some(stdout) = pipe.stdout {
            spawn_copy(format!("{process}-stdout"), stdout, io::stdout())?;
        }
        if let Some(stderr) = pipe.stderr {
            spawn_copy(format!("{process}-stderr"), stderr, io::stderr())?;
        }
        // Dropping an unforwarded write end gives the process EOF on stdin.
        if let Some(stdin) = pipe.stdin.filter(|_| self.forward_stdin) {
            spawn_copy(format!("{process}-stdin"), io::stdin(), stdin)?;
        }
        Ok(())
    }

    fn state_changed(&self, id: &ContainerId, info: StateInfo) -> Result<()> {
        self.events
            .send((id.clone(), info))
            .map_err(|e| ContaindError::Backend {
                message: format!("state listener gone: {e}"),
            })
    }
}
