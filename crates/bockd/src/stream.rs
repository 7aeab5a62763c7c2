//! Engine-side stdio of a container or exec session.
//!
//! A [`StreamConfig`] owns the stdin source handed in by a client, the
//! stdout and stderr [`Broadcaster`]s that fan runtime output out to log
//! and attached sinks, and a [`WaitGroup`] counting in-flight copies.

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bock_remote::{PipeReader, PipeWriter};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};

/// Size of the buffer used when copying runtime output.
const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Counter of pending operations that can be awaited to reach zero.
#[derive(Debug, Clone)]
pub struct WaitGroup {
    count: Arc<watch::Sender<usize>>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }
}

impl WaitGroup {
    /// New counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` pending operations.
    pub fn add(&self, n: usize) {
        self.count.send_modify(|count| *count += n);
    }

    /// Mark one operation finished.
    pub fn done(&self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }

    /// Operations still pending.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until no operation is pending.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

/// Destination for one output stream.
#[async_trait]
pub trait StreamSink: Send {
    /// Deliver a chunk of output.
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flush and release the sink.
    async fn close(&mut self) -> io::Result<()>;
}

/// [`StreamSink`] over any async writer, such as an attached client.
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    /// Sink writing to `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> StreamSink for WriterSink<W> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Role of a sink within a [`Broadcaster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Log driver capture.
    Log,
    /// A client attached to the container.
    Attached,
}

struct Entry {
    kind: SinkKind,
    sink: Box<dyn StreamSink>,
}

/// Fans one output stream out to many sinks.
///
/// A sink that fails a write is closed and dropped; the others keep
/// receiving output.
#[derive(Default)]
pub struct Broadcaster {
    sinks: Mutex<Vec<Entry>>,
}

impl Broadcaster {
    /// Add a sink.
    pub async fn add(&self, kind: SinkKind, sink: Box<dyn StreamSink>) {
        self.sinks.lock().await.push(Entry { kind, sink });
    }

    /// Write `chunk` to every sink.
    pub async fn write(&self, chunk: &[u8]) {
        let mut sinks = self.sinks.lock().await;
        let mut i = 0;
        while i < sinks.len() {
            if let Err(err) = sinks[i].sink.write(chunk).await {
                tracing::warn!(error = %err, kind = ?sinks[i].kind, "Dropping failed stream sink");
                let mut failed = sinks.swap_remove(i);
                let _ = failed.sink.close().await;
            } else {
                i += 1;
            }
        }
    }

    /// Close and remove sinks, all of them when `kind` is `None`.
    ///
    /// # Errors
    ///
    /// Returns the first close failure; every selected sink is removed anyway.
    pub async fn close(&self, kind: Option<SinkKind>) -> io::Result<()> {
        let selected: Vec<Entry> = {
            let mut sinks = self.sinks.lock().await;
            let (selected, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut *sinks)
                .into_iter()
                .partition(|entry| kind.is_none_or(|k| entry.kind == k));
            *sinks = kept;
            selected
        };

        let mut result = Ok(());
        for mut entry in selected {
            if let Err(err) = entry.sink.close().await {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Number of sinks of `kind`.
    pub async fn count(&self, kind: SinkKind) -> usize {
        self.sinks.lock().await.iter().filter(|e| e.kind == kind).count()
    }
}

/// Which output stream a copy feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Stdio plumbing for one container or exec session.
#[derive(Default)]
pub struct StreamConfig {
    stdin: parking_lot::Mutex<Option<PipeReader>>,
    stdin_pipe: Mutex<Option<PipeWriter>>,
    stdout: Broadcaster,
    stderr: Broadcaster,
    wait_group: WaitGroup,
}

impl StreamConfig {
    /// Streams with nothing attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide the source of the process's input.
    pub fn set_stdin(&self, source: PipeReader) {
        *self.stdin.lock() = Some(source);
    }

    /// Whether an input source is present.
    #[must_use]
    pub fn has_stdin(&self) -> bool {
        self.stdin.lock().is_some()
    }

    /// Take the input source.
    pub fn take_stdin(&self) -> Option<PipeReader> {
        self.stdin.lock().take()
    }

    /// Keep the runtime's stdin pipe open without a source.
    pub async fn hold_stdin_pipe(&self, pipe: PipeWriter) {
        *self.stdin_pipe.lock().await = Some(pipe);
    }

    /// Whether a stdin pipe is being held open.
    pub async fn holds_stdin_pipe(&self) -> bool {
        self.stdin_pipe.lock().await.is_some()
    }

    /// Output broadcaster for `stream`.
    #[must_use]
    pub const fn output(&self, stream: StdStream) -> &Broadcaster {
        match stream {
            StdStream::Stdout => &self.stdout,
            StdStream::Stderr => &self.stderr,
        }
    }

    /// Standard output broadcaster.
    #[must_use]
    pub const fn stdout(&self) -> &Broadcaster {
        &self.stdout
    }

    /// Standard error broadcaster.
    #[must_use]
    pub const fn stderr(&self) -> &Broadcaster {
        &self.stderr
    }

    /// Counter of in-flight copies.
    #[must_use]
    pub const fn wait_group(&self) -> &WaitGroup {
        &self.wait_group
    }

    /// Wait for every in-flight copy to finish.
    pub async fn wait(&self) {
        self.wait_group.wait().await;
    }

    /// Copy `reader` into the `stream` broadcaster until EOF.
    ///
    /// # Errors
    ///
    /// Returns the read error that ended the copy.
    pub async fn copy_output(&self, stream: StdStream, mut reader: PipeReader) -> io::Result<u64> {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            self.output(stream).write(&buf[..n]).await;
            total += n as u64;
        }
    }

    /// Close the log sinks on both outputs.
    ///
    /// # Errors
    ///
    /// Returns the first close failure.
    pub async fn close_logs(&self) -> io::Result<()> {
        let stdout = self.stdout.close(Some(SinkKind::Log)).await;
        let stderr = self.stderr.close(Some(SinkKind::Log)).await;
        stdout.and(stderr)
    }

    /// Close every stream: drop the input source, shut the held stdin pipe
    /// and close all output sinks.
    ///
    /// # Errors
    ///
    /// Returns the first close failure; the remaining streams are still closed.
    pub async fn close_streams(&self) -> io::Result<()> {
        drop(self.take_stdin());

        let stdin = match self.stdin_pipe.lock().await.take() {
            Some(mut pipe) => pipe.shutdown().await,
            None => Ok(()),
        };
        let stdout = self.stdout.close(None).await;
        let stderr = self.stderr.close(None).await;
        stdin.and(stdout).and(stderr)
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("stdin", &self.has_stdin())
            .field("pending", &self.wait_group.pending())
            .finish_non_exhaustive()
    }
}
