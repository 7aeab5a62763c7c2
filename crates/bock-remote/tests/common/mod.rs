//! Fakes shared by the client integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bock_common::{BockError, BockResult};
use bock_oci::{Process, Resources};
use bock_remote::hcs::api::{ComputeSystemApi, HcsError, Timeout};
use bock_remote::hcs::ProcessParams;
use bock_remote::task::{TaskApi, TaskError};
use bock_remote::{Backend, ExitStatus, IoPipe, LifecycleEvent, SpawnedProcess, Stats};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};

/// Backend that records every callback.
#[derive(Default)]
pub struct RecordingBackend {
    pub events: Mutex<Vec<(String, LifecycleEvent)>>,
    pub attached: Mutex<Vec<String>>,
    pub fail_attach: AtomicBool,
    notify: Notify,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, LifecycleEvent)> {
        self.events.lock().clone()
    }

    /// Wait until at least `count` events were recorded.
    pub async fn wait_for_events(&self, count: usize) -> Vec<(String, LifecycleEvent)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().len() >= count {
                    break;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for lifecycle events");
        self.events()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn state_changed(&self, id: &str, event: LifecycleEvent) -> BockResult<()> {
        self.events.lock().push((id.to_string(), event));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn attach_streams(&self, id: &str, _pipes: IoPipe) -> BockResult<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(BockError::Internal {
                message: "attach refused".to_string(),
            });
        }
        self.attached.lock().push(id.to_string());
        Ok(())
    }
}

/// Process exits the test triggers by hand.
#[derive(Default)]
struct Exits<K: std::hash::Hash + Eq> {
    senders: Mutex<HashMap<K, oneshot::Sender<ExitStatus>>>,
    receivers: Mutex<HashMap<K, oneshot::Receiver<ExitStatus>>>,
    // Senders replaced by a re-registration; kept so old waiters stay blocked.
    replaced: Mutex<Vec<oneshot::Sender<ExitStatus>>>,
}

impl<K: std::hash::Hash + Eq + Clone> Exits<K> {
    fn register(&self, key: K) {
        let (tx, rx) = oneshot::channel();
        if let Some(old) = self.senders.lock().insert(key.clone(), tx) {
            self.replaced.lock().push(old);
        }
        self.receivers.lock().insert(key, rx);
    }

    fn take(&self, key: &K) -> Option<oneshot::Receiver<ExitStatus>> {
        self.receivers.lock().remove(key)
    }

    fn fire(&self, key: &K, status: ExitStatus) {
        if let Some(tx) = self.senders.lock().remove(key) {
            let _ = tx.send(status);
        }
    }
}

/// Compute service double.
#[derive(Default)]
pub struct FakeHcs {
    pub needs_retry: bool,
    pub create_failures: Mutex<VecDeque<HcsError>>,
    pub create_calls: AtomicU32,
    pub create_times: Mutex<Vec<tokio::time::Instant>>,
    pub fail_create_process: AtomicBool,
    pub fail_terminate_process: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub processes: Mutex<Vec<ProcessParams>>,
    next_pid: AtomicU32,
    exits: Exits<u32>,
}

impl FakeHcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_retry() -> Arc<Self> {
        Arc::new(Self {
            needs_retry: true,
            ..Self::default()
        })
    }

    pub fn fail_creates(&self, code: u32, times: usize) {
        let mut failures = self.create_failures.lock();
        for _ in 0..times {
            failures.push_back(HcsError::new("CreateComputeSystem", code, "create failed"));
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn exit(&self, pid: u32, code: u32) {
        self.exits.fire(&pid, ExitStatus::code(code));
    }
}

#[async_trait]
impl ComputeSystemApi for FakeHcs {
    fn requires_create_retry(&self) -> bool {
        self.needs_retry
    }

    async fn create_compute_system(&self, id: &str, _configuration: &str) -> Result<(), HcsError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.create_times.lock().push(tokio::time::Instant::now());
        match self.create_failures.lock().pop_front() {
            Some(err) => Err(err),
            None => {
                self.calls.lock().push(format!("create:{id}"));
                Ok(())
            }
        }
    }

    async fn create_process(&self, id: &str, params: &ProcessParams) -> Result<SpawnedProcess, HcsError> {
        if self.fail_create_process.load(Ordering::SeqCst) {
            return Err(HcsError::new("CreateProcessInComputeSystem", 2, "no such file"));
        }
        let pid = 100 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.exits.register(pid);
        self.processes.lock().push(params.clone());
        self.calls.lock().push(format!("create_process:{id}:{pid}"));
        Ok(SpawnedProcess {
            pid,
            pipes: IoPipe::empty(),
        })
    }

    async fn wait_process(&self, _id: &str, pid: u32) -> Result<u32, HcsError> {
        let rx = self
            .exits
            .take(&pid)
            .ok_or_else(|| HcsError::new("WaitForProcessInComputeSystem", 1168, "not found"))?;
        rx.await
            .map(|status| status.exit_code)
            .map_err(|_| HcsError::new("WaitForProcessInComputeSystem", 6, "handle closed"))
    }

    async fn terminate_process(&self, id: &str, pid: u32) -> Result<(), HcsError> {
        self.calls.lock().push(format!("terminate_process:{id}:{pid}"));
        if self.fail_terminate_process.load(Ordering::SeqCst) {
            return Err(HcsError::new("TerminateProcessInComputeSystem", 5, "access denied"));
        }
        Ok(())
    }

    async fn terminate_compute_system(&self, id: &str, timeout: Timeout, _context: &str) -> Result<(), HcsError> {
        assert_eq!(timeout, Timeout::Infinite);
        self.calls.lock().push(format!("terminate:{id}"));
        Ok(())
    }

    async fn shutdown_compute_system(&self, id: &str, timeout: Timeout, _context: &str) -> Result<(), HcsError> {
        assert_eq!(timeout, Timeout::Infinite);
        self.calls.lock().push(format!("shutdown:{id}"));
        Ok(())
    }
}

/// Task service double.
#[derive(Default)]
pub struct FakeTasks {
    pub fail_create: AtomicBool,
    pub fail_kill: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub running: Mutex<Vec<String>>,
    next_pid: AtomicU32,
    exits: Exits<(String, String)>,
    oom: Mutex<HashMap<String, mpsc::Sender<()>>>,
}

impl FakeTasks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn exit(&self, id: &str, process_id: &str, status: ExitStatus) {
        self.exits
            .fire(&(id.to_string(), process_id.to_string()), status);
    }

    pub async fn oom(&self, id: &str) {
        let tx = self.oom.lock().get(id).cloned();
        if let Some(tx) = tx {
            tx.send(()).await.unwrap();
        }
    }

    fn spawn(&self, id: &str, process_id: &str) -> SpawnedProcess {
        let pid = 200 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.exits.register((id.to_string(), process_id.to_string()));
        SpawnedProcess {
            pid,
            pipes: IoPipe::empty(),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl TaskApi for FakeTasks {
    async fn create(&self, id: &str, bundle: &Path, _terminal: bool) -> Result<SpawnedProcess, TaskError> {
        self.record(format!("create:{id}"));
        assert!(bundle.join("config.json").is_file());
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TaskError::failed("create", "runtime exploded"));
        }
        self.running.lock().push(id.to_string());
        Ok(self.spawn(id, "init"))
    }

    async fn attach(&self, id: &str) -> Result<SpawnedProcess, TaskError> {
        self.record(format!("attach:{id}"));
        if !self.running.lock().iter().any(|r| r == id) {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(self.spawn(id, "init"))
    }

    async fn exec(&self, id: &str, process_id: &str, _process: &Process) -> Result<SpawnedProcess, TaskError> {
        self.record(format!("exec:{id}:{process_id}"));
        Ok(self.spawn(id, process_id))
    }

    async fn wait(&self, id: &str, process_id: &str) -> Result<ExitStatus, TaskError> {
        let rx = self
            .exits
            .take(&(id.to_string(), process_id.to_string()))
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        rx.await.map_err(|_| TaskError::failed("wait", "channel closed"))
    }

    async fn kill(&self, id: &str, process_id: &str, signal: i32) -> Result<(), TaskError> {
        self.record(format!("kill:{id}:{process_id}:{signal}"));
        if self.fail_kill.load(Ordering::SeqCst) {
            return Err(TaskError::failed("kill", "no such process"));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), TaskError> {
        self.record(format!("delete:{id}"));
        self.running.lock().retain(|r| r != id);
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), TaskError> {
        self.record(format!("pause:{id}"));
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<(), TaskError> {
        self.record(format!("resume:{id}"));
        Ok(())
    }

    async fn resize(&self, id: &str, process_id: &str, width: u32, height: u32) -> Result<(), TaskError> {
        self.record(format!("resize:{id}:{process_id}:{width}x{height}"));
        Ok(())
    }

    async fn stats(&self, _id: &str) -> Result<Stats, TaskError> {
        Ok(Stats {
            cpu_usage_usec: 1_500,
            memory_usage_bytes: 4096,
            pids: 2,
        })
    }

    async fn pids(&self, _id: &str) -> Result<Vec<u32>, TaskError> {
        Ok(vec![200, 201])
    }

    async fn update(&self, id: &str, _resources: &Resources) -> Result<(), TaskError> {
        self.record(format!("update:{id}"));
        Ok(())
    }

    async fn oom_events(&self, id: &str) -> Result<mpsc::Receiver<()>, TaskError> {
        let (tx, rx) = mpsc::channel(4);
        self.oom.lock().insert(id.to_string(), tx);
        Ok(rx)
    }
}
