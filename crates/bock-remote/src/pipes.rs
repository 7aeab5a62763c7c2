//! I/O pipes handed out by the runtime for a started process.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// Writable end of the runtime's stdin pipe.
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable end of the runtime's stdout or stderr pipe.
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Up to three byte-stream endpoints for one process.
///
/// Any of them may be absent: a process started without stdin has no
/// stdin pipe, and a process with a terminal multiplexes stderr into stdout.
#[derive(Default)]
pub struct IoPipe {
    /// Pipe the coordinator writes the process's input into.
    pub stdin: Option<PipeWriter>,
    /// Pipe the coordinator reads the process's output from.
    pub stdout: Option<PipeReader>,
    /// Pipe the coordinator reads the process's error output from.
    pub stderr: Option<PipeReader>,
    /// Whether the process runs with a pseudo-terminal.
    pub terminal: bool,
}

impl IoPipe {
    /// Pipe set with no endpoints.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
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

/// A process the runtime has started, with its system pid and pipes.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Runtime-assigned process id.
    pub pid: u32,
    /// The process's I/O endpoints.
    pub pipes: IoPipe,
}
