//! Task service surface used by [`TaskClient`](super::TaskClient).

use std::path::Path;

use async_trait::async_trait;
use bock_common::BockError;
use bock_oci::{Process, Resources};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::client::Stats;
use crate::event::ExitStatus;
use crate::pipes::SpawnedProcess;

/// A failed task service call.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The service has no task with this id.
    #[error("task {0} not found")]
    NotFound(String),

    /// The service rejected the call.
    #[error("{operation}: {message}")]
    Failed {
        /// Service call that failed.
        operation: String,
        /// Service message.
        message: String,
    },
}

impl TaskError {
    /// New [`TaskError::Failed`].
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<TaskError> for BockError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => Self::ContainerNotFound { id },
            TaskError::Failed { operation, message } => Self::Runtime {
                operation,
                code: None,
                message,
            },
        }
    }
}

/// Calls into the task service.
///
/// Process ids name exec sessions; the init process is
/// [`INIT_PROCESS`](crate::container::INIT_PROCESS).
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Create and start task `id` from the bundle at `bundle`.
    async fn create(&self, id: &str, bundle: &Path, terminal: bool) -> Result<SpawnedProcess, TaskError>;

    /// Reattach to the init process of a running task.
    async fn attach(&self, id: &str) -> Result<SpawnedProcess, TaskError>;

    /// Start `process` as `process_id` inside task `id`.
    async fn exec(&self, id: &str, process_id: &str, process: &Process) -> Result<SpawnedProcess, TaskError>;

    /// Block until the process exits.
    async fn wait(&self, id: &str, process_id: &str) -> Result<ExitStatus, TaskError>;

    /// Send `signal` to a process.
    async fn kill(&self, id: &str, process_id: &str, signal: i32) -> Result<(), TaskError>;

    /// Remove a stopped task.
    async fn delete(&self, id: &str) -> Result<(), TaskError>;

    /// Freeze the task.
    async fn pause(&self, id: &str) -> Result<(), TaskError>;

    /// Thaw the task.
    async fn resume(&self, id: &str) -> Result<(), TaskError>;

    /// Resize a process terminal.
    async fn resize(&self, id: &str, process_id: &str, width: u32, height: u32) -> Result<(), TaskError>;

    /// Sample resource usage.
    async fn stats(&self, id: &str) -> Result<Stats, TaskError>;

    /// System pids in the task.
    async fn pids(&self, id: &str) -> Result<Vec<u32>, TaskError>;

    /// Apply new resource limits.
    async fn update(&self, id: &str, resources: &Resources) -> Result<(), TaskError>;

    /// Out-of-memory notifications for the task, one message each.
    async fn oom_events(&self, id: &str) -> Result<mpsc::Receiver<()>, TaskError>;
}
