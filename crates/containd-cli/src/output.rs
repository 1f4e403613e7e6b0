//! Formatting of lifecycle events for the terminal.

use containd_runtime::{StateInfo, StateKind};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// One status line for a state change of container `name`.
#[must_use]
pub fn format_state(name: &str, info: &StateInfo) -> String {
    let (color, label) = match info.state {
        StateKind::Start => (GREEN, "started"),
        StateKind::Restart => (YELLOW, "restarting"),
        StateKind::Exit | StateKind::ExitProcess if info.exit_code == 0 => (DIM, "exited"),
        StateKind::Exit | StateKind::ExitProcess => (RED, "exited"),
    };
    let mut line = format!(
        "  {color}●{RESET} {BOLD}{name}{RESET} {label} {DIM}[{} pid {}]{RESET}",
        info.process_id, info.pid
    );
    if info.state != StateKind::Start {
        line.push_str(&format!(" code {}", info.exit_code));
    }
    if info.update_pending {
        line.push_str(&format!(" {YELLOW}(update pending){RESET}"));
    }
    line
}

/// Maps a container exit code onto this process's exit status.
#[must_use]
pub fn exit_status(code: u32) -> u8 {
    u8::try_from(code).unwrap_or(u8::MAX)
}
