//! Helpers shared by the daemon integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bock_oci::{Process, Resources};
use bock_remote::task::{TaskApi, TaskError};
use bock_remote::{ExitStatus, IoPipe, SpawnedProcess, Stats};
use bockd::{Daemon, DaemonConfig, LogDriver, Platform, StreamSink};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};

pub struct Harness {
    pub temp: TempDir,
    pub daemon: Arc<Daemon>,
}

pub fn harness(platform: Platform) -> Harness {
    harness_with_driver(platform, LogDriver::JsonFile)
}

pub fn harness_with_driver(platform: Platform, driver: LogDriver) -> Harness {
    let temp = TempDir::new().unwrap();
    let config = DaemonConfig::default()
        .with_root(temp.path())
        .with_exec_root(temp.path().join("run"))
        .with_platform(platform)
        .with_log_driver(driver);
    Harness {
        daemon: Arc::new(Daemon::new(config)),
        temp,
    }
}

/// Sink collecting everything written to it.
#[derive(Clone, Default)]
pub struct Collect(pub Arc<Mutex<Vec<u8>>>);

impl Collect {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[async_trait]
impl StreamSink for Collect {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.0.lock().extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that takes its time with every write.
pub struct Slow {
    pub delay: Duration,
    pub written: Collect,
}

#[async_trait]
impl StreamSink for Slow {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.written.write(chunk).await
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read until EOF, failing the test if it takes longer than a second.
pub async fn read_to_eof(reader: &mut DuplexStream) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(1), reader.read_to_end(&mut out))
        .await
        .expect("pipe was not closed")
        .unwrap();
    out
}

pub fn log_lines(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Task service whose processes have real stdout pipes.
#[derive(Default)]
pub struct PipedTasks {
    /// Writable ends of each process's stdout, by process id.
    pub stdout: Mutex<HashMap<String, DuplexStream>>,
    exits: Mutex<HashMap<(String, String), oneshot::Receiver<ExitStatus>>>,
    senders: Mutex<HashMap<(String, String), oneshot::Sender<ExitStatus>>>,
    next_pid: Mutex<u32>,
}

impl PipedTasks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_stdout(&self, process_id: &str) -> DuplexStream {
        self.stdout.lock().remove(process_id).unwrap()
    }

    pub fn exit(&self, id: &str, process_id: &str, status: ExitStatus) {
        let tx = self
            .senders
            .lock()
            .remove(&(id.to_string(), process_id.to_string()))
            .unwrap();
        tx.send(status).unwrap();
    }

    fn spawn(&self, id: &str, process_id: &str) -> SpawnedProcess {
        let (tx, rx) = oneshot::channel();
        let key = (id.to_string(), process_id.to_string());
        self.senders.lock().insert(key.clone(), tx);
        self.exits.lock().insert(key, rx);

        let (writer, reader) = tokio::io::duplex(1024);
        self.stdout.lock().insert(process_id.to_string(), writer);

        let mut next = self.next_pid.lock();
        *next += 1;
        SpawnedProcess {
            pid: 1000 + *next,
            pipes: IoPipe {
                stdout: Some(Box::new(reader)),
                ..IoPipe::default()
            },
        }
    }
}

#[async_trait]
impl TaskApi for PipedTasks {
    async fn create(&self, id: &str, _bundle: &Path, _terminal: bool) -> Result<SpawnedProcess, TaskError> {
        Ok(self.spawn(id, "init"))
    }

    async fn attach(&self, id: &str) -> Result<SpawnedProcess, TaskError> {
        Err(TaskError::NotFound(id.to_string()))
    }

    async fn exec(&self, id: &str, process_id: &str, _process: &Process) -> Result<SpawnedProcess, TaskError> {
        Ok(self.spawn(id, process_id))
    }

    async fn wait(&self, id: &str, process_id: &str) -> Result<ExitStatus, TaskError> {
        let rx = self
            .exits
            .lock()
            .remove(&(id.to_string(), process_id.to_string()))
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        rx.await.map_err(|_| TaskError::failed("wait", "closed"))
    }

    async fn kill(&self, _id: &str, _process_id: &str, _signal: i32) -> Result<(), TaskError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<(), TaskError> {
        Ok(())
    }

    async fn pause(&self, _id: &str) -> Result<(), TaskError> {
        Ok(())
    }

    async fn resume(&self, _id: &str) -> Result<(), TaskError> {
        Ok(())
    }

    async fn resize(&self, _id: &str, _process_id: &str, _width: u32, _height: u32) -> Result<(), TaskError> {
        Ok(())
    }

    async fn stats(&self, _id: &str) -> Result<Stats, TaskError> {
        Ok(Stats::default())
    }

    async fn pids(&self, _id: &str) -> Result<Vec<u32>, TaskError> {
        Ok(Vec::new())
    }

    async fn update(&self, _id: &str, _resources: &Resources) -> Result<(), TaskError> {
        Ok(())
    }

    async fn oom_events(&self, id: &str) -> Result<mpsc::Receiver<()>, TaskError> {
        Err(TaskError::NotFound(id.to_string()))
    }
}
