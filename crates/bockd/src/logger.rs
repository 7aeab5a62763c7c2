//! `json-file` log driver.
//!
//! Every chunk of container output becomes one line:
//!
//! ```text
//! {"log":"hello\n","stream":"stdout","time":"2024-05-01T10:00:00.000000000Z"}
//! ```
//!
//! A UTF-8 sequence split across two reads is held back until it completes.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::stream::{StdStream, StreamSink};

#[derive(Serialize)]
struct LogLine<'a> {
    log: &'a str,
    stream: String,
    time: String,
}

/// Open log file shared by the stdout and stderr sinks of one container.
#[derive(Clone)]
pub struct JsonFileLogger {
    file: Arc<Mutex<File>>,
}

impl JsonFileLogger {
    /// Open `path` for appending, creating it and its directory if needed.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub async fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Sink tagging its lines with `stream`.
    #[must_use]
    pub fn sink(&self, stream: StdStream) -> JsonFileSink {
        JsonFileSink {
            logger: self.clone(),
            stream,
            partial: Vec::new(),
        }
    }

    async fn log(&self, stream: StdStream, chunk: &[u8]) -> io::Result<()> {
        let line = LogLine {
            log: &String::from_utf8_lossy(chunk),
            stream: stream.to_string(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        };
        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');
        self.file.lock().await.write_all(&bytes).await
    }
}

/// One stream's view of a [`JsonFileLogger`].
pub struct JsonFileSink {
    logger: JsonFileLogger,
    stream: StdStream,
    /// Start of a UTF-8 sequence still waiting for its remaining bytes.
    partial: Vec<u8>,
}

#[async_trait]
impl StreamSink for JsonFileSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.partial.extend_from_slice(chunk);
        let complete = complete_prefix_len(&self.partial);
        if complete == 0 {
            return Ok(());
        }
        let tail = self.partial.split_off(complete);
        let head = std::mem::replace(&mut self.partial, tail);
        self.logger.log(self.stream, &head).await
    }

    async fn close(&mut self) -> io::Result<()> {
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            self.logger.log(self.stream, &rest).await?;
        }
        self.logger.file.lock().await.flush().await
    }
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence.
///
/// Invalid bytes in the middle count as complete; they are logged as U+FFFD.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut offset = 0;
    loop {
        match std::str::from_utf8(&bytes[offset..]) {
            Ok(_) => return bytes.len(),
            Err(err) => match err.error_len() {
                None => return offset + err.valid_up_to(),
                Some(invalid) => offset += err.valid_up_to() + invalid,
            },
        }
    }
}
