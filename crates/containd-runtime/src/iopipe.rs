//! Standard streams of a running process.

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};

/// Buffered reader over a raw host pipe.
pub type PipeReader = Box<dyn BufRead + Send>;

/// Write end of a process's standard input.
pub type PipeWriter = Box<dyn Write + Send>;

/// The standard streams of one process plus its terminal flag.
///
/// A fresh pipe is produced by every start; it is handed to the backend
/// by value and never reused across restarts.
pub struct IoPipe {
    /// Standard input of the process.
    pub stdin: Option<PipeWriter>,
    /// Standard output of the process.
    pub stdout: Option<PipeReader>,
    /// Standard error; absent in terminal mode, where it is folded into stdout.
    pub stderr: Option<PipeReader>,
    /// Whether the process runs with an emulated console.
    pub terminal: bool,
}

impl IoPipe {
    /// Wraps raw host streams, buffering the read ends.
    #[must_use]
    pub fn new(
        stdin: Option<PipeWriter>,
        stdout: Option<Box<dyn Read + Send>>,
        stderr: Option<Box<dyn Read + Send>>,
        terminal: bool,
    ) -> Self {
        Self {
            stdin,
            stdout: stdout.map(buffered),
            stderr: stderr.map(buffered),
            terminal,
        }
    }
}

fn buffered(raw: Box<dyn Read + Send>) -> PipeReader {
    Box::new(BufReader::new(raw))
}

impl fmt::Debug for IoPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoPipe")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("terminal", &self.terminal)
            .finish()
    }
}
